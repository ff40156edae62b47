use std::env;
use std::sync::OnceLock;

static CONVRS_BACKEND: OnceLock<String> = OnceLock::new();
static CONVRS_FAER_THREADS: OnceLock<Option<usize>> = OnceLock::new();

const DEFAULT_BACKEND: &str = "cpu";

/// Registry name used by [`crate::nn::layers::Conv2d::from_env`] (`CONVRS_BACKEND`).
pub fn default_backend_name() -> &'static str {
    CONVRS_BACKEND.get_or_init(|| match env::var("CONVRS_BACKEND") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_ascii_lowercase(),
        _ => DEFAULT_BACKEND.to_string(),
    })
}

/// Thread count requested for the faer backend (`CONVRS_FAER_THREADS`); `None` keeps faer's default.
pub fn faer_threads() -> Option<usize> {
    *CONVRS_FAER_THREADS.get_or_init(|| match env::var("CONVRS_FAER_THREADS") {
        Ok(value) => parse_threads(&value),
        Err(_) => None,
    })
}

fn parse_threads(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|&n| n > 0)
}
