//! ROMHarvest - ROM metadata and media scraping system.
//!
//! Scrapes game metadata and artwork for ROM collections from a quota-limited
//! remote API and writes EmulationStation-style gamelist.xml files.

pub mod api;
pub mod cli;
pub mod config;
pub mod gamelist;
pub mod models;
pub mod roms;
pub mod scraper;
