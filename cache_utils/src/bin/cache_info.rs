#![deny(unsafe_op_in_unsafe_fn)]

use cache_utils::cache_info::{cache_line_size, data_cache_size, flood_size, get_cache_info};
use cache_utils::mmap::page_size;

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let caches = get_cache_info();
    if caches.is_empty() {
        log::warn!("cache geometry is not available on this platform");
    }
    println!("{:#?}", caches);

    println!("Page size: {} B", page_size());
    match cache_line_size(&caches) {
        Some(line) => println!("Cache line size: {} B", line),
        None => println!("Cache line size: unknown"),
    }
    for level in 1..=3 {
        let detected = data_cache_size(&caches, level)
            .map(|size| format!("{} KiB", size / 1024))
            .unwrap_or_else(|| "not detected".to_owned());
        println!(
            "L{}: {}, flood buffer {} KiB",
            level,
            detected,
            flood_size(&caches, level) / 1024
        );
    }
}
