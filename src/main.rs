/// hamwx_service: polls space-weather feeds for the ham-radio dashboard,
/// keeps each source's cache and history, and ranks the sources.
///
/// Usage:
///   hamwx_service            run the poll loop
///   hamwx_service --once     poll every source once and print the ranking
///   hamwx_service --verify   check every configured source and print a report

use hamwx_service::cache::{self, CachedFileStore};
use hamwx_service::config::{Config, EnvSettings};
use hamwx_service::logging::{self, Channel};
use hamwx_service::model::FatalError;
use hamwx_service::registry::{self, FeedRegistry};
use hamwx_service::transport::{self, Fetcher, HttpFetcher, LineStream, HttpLineStream};
use hamwx_service::verify;
use std::rc::Rc;
use std::time::Duration;

/// Partial downloads older than this are removed at startup.
const STALE_DOWNLOAD_SECS: i64 = 3600;

fn main() {
    dotenv::dotenv().ok();
    let env = EnvSettings::from_env();
    logging::init_logger(env.log_level, env.log_file.as_deref(), env.log_file.is_some());

    let config = match Config::from_env(&env) {
        Ok(config) => config,
        Err(e) => {
            logging::error(Channel::System, None, &format!("configuration: {}", e));
            std::process::exit(2);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--verify") {
        run_verify(&config);
        return;
    }
    let once = args.iter().any(|a| a == "--once");

    if let Err(e) = run(&config, once) {
        logging::error(
            Channel::System,
            Some(&e.source_label),
            &format!("fatal, shutting down: {}", e.detail),
        );
        std::process::exit(1);
    }
}

fn run_verify(config: &Config) {
    match verify::run_full_verification(config) {
        Ok(report) => {
            verify::print_summary(&report);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => logging::warn(Channel::System, None, &format!("report JSON: {}", e)),
            }
        }
        Err(e) => {
            logging::error(Channel::System, None, &format!("verification failed: {}", e));
            std::process::exit(1);
        }
    }
}

fn run(config: &Config, once: bool) -> Result<(), FatalError> {
    let timeout = Duration::from_secs(config.service.timeout_secs);
    let fetcher: Rc<dyn Fetcher> = match HttpFetcher::new(transport::USER_AGENT, timeout) {
        Ok(f) => Rc::new(f),
        Err(e) => {
            return Err(FatalError {
                source_label: "http".to_string(),
                detail: e.to_string(),
            });
        }
    };
    let user_agent = transport::USER_AGENT;
    let streams =
        move || -> Box<dyn LineStream> { Box::new(HttpLineStream::new(timeout).with_user_agent(user_agent)) };

    let store = CachedFileStore::new(&config.service.cache_dir)
        .with_bundle_dirs(config.service.bundle_dirs.clone());
    match store.clean_cache(cache::file::TEMP_PREFIX, STALE_DOWNLOAD_SECS) {
        Ok(0) => {}
        Ok(n) => logging::info(Channel::Cache, None, &format!("removed {} stale download(s)", n)),
        Err(e) => logging::warn(Channel::Cache, None, &format!("cache cleanup: {}", e)),
    }

    let now = chrono::Utc::now();
    let mut feeds = FeedRegistry::from_config(config, Rc::clone(&fetcher), &streams, now)
        .map_err(|e| FatalError {
            source_label: "config".to_string(),
            detail: e.to_string(),
        })?;

    feeds.refresh_coefficients_at(
        &store,
        fetcher.as_ref(),
        &registry::rank_coeffs_url(config),
        config.service.rank_coeffs_max_age_secs,
        now,
    )?;

    logging::info(
        Channel::System,
        None,
        &format!(
            "polling {} source(s) every {}s",
            feeds.len(),
            config.service.poll_interval_secs
        ),
    );

    loop {
        if feeds.poll_all()? || once {
            print_ranking(&feeds);
        }
        if once {
            return Ok(());
        }
        std::thread::sleep(Duration::from_secs(config.service.poll_interval_secs));
    }
}

fn print_ranking(feeds: &FeedRegistry) {
    let mode = if feeds.ranker().is_auto() { "auto" } else { "manual" };
    println!("── summary ({}) ──", mode);
    for r in feeds.displayed() {
        let Some(reading) = feeds.reading(&r.label) else {
            continue;
        };
        let cell = cache::display_cell(&reading, |v| format!("{:.2}", v));
        println!(
            "  {:<8} {:>10} {}",
            r.label,
            cell.text,
            cell.marker.unwrap_or_default()
        );
    }
}
