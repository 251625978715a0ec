//! Acquisition and parsing of feed artifacts: page drivers, the fetcher and the CSV parser.

mod csv;
mod driver;
mod fetcher;
mod fixture;
mod http_driver;

pub use csv::{CsvParser, ParseError, ParsedCsv, Records};
pub use driver::{DriverError, DriverLauncher, PageDriver};
pub use fetcher::{ArtifactTarget, FetchFailure, FetchPolicy, FetchStage, Fetcher};
pub use fixture::{
    load_fixture_site, FixtureDownload, FixtureLauncher, FixturePage, FixturePageDriver,
    FixtureSite,
};
pub use http_driver::{HttpDriverLauncher, HttpPageDriver};
