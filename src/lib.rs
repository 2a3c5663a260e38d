//! CMP DOCTOR SCRAPER
//! Crawls the CMP "conoce a tu médico" directory: specialties, their doctor lists,
//! and every doctor's profile page, into a CSV (and optionally JSON) store.

pub mod cli;
pub mod config;
pub mod dispatch;
mod error;
pub mod filter;
mod macros;
pub mod parse;
pub mod process;
pub mod record;
pub mod request;
pub mod session;
pub mod store;

pub use config::CrawlConfig;
pub use error::{Error, FetchError, Result};
pub use process::Crawler;
pub use record::{DoctorRecord, DoctorSummary, Registration, Specialty};
pub use request::{Fetch, Fetcher};
pub use session::{CrawlSummary, StopSignal};
