use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView};
use imageloader_service::{ResourceCache, ResourceKey};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};

pub type Loaded = Arc<DynamicImage>;

/// The outcome of loading a single URL.
#[derive(Debug)]
pub struct Report {
    pub key: ResourceKey,
    /// Whether the load was answered from the cache.
    pub cached: bool,
    pub elapsed: Duration,
    pub result: Result<Loaded, String>,
    /// The cost the image is currently cached with, if it is cached.
    pub cost: Option<u32>,
}

pub fn print_pass(title: &str, reports: &[Report]) {
    println!("{title}:");

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "URL", "Cache", "Outcome", "Dimensions", "Cost", "Time"]);

    for report in reports {
        let cache = if report.cached { "hit" } else { "miss" };
        let (outcome, dimensions) = match &report.result {
            Ok(image) => {
                let (width, height) = image.dimensions();
                ("ok".to_owned(), format!("{width}x{height}"))
            }
            Err(reason) => (reason.clone(), String::new()),
        };
        let cost = report
            .cost
            .map(|cost| cost.to_string())
            .unwrap_or_default();

        table.add_row(row![
            report.key,
            cache,
            outcome,
            dimensions,
            r->cost,
            r->format!("{:.1?}", report.elapsed)
        ]);
    }

    table.printstd();
    println!();
}

pub fn print_summary(cache: &ResourceCache<Loaded>) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.add_row(row![r->"Cached images:", cache.entry_count()]);
    table.add_row(row![r->"Total cost:", cache.weighted_size()]);
    table.add_row(row![r->"Capacity:", cache.capacity()]);
    table.printstd();
}
