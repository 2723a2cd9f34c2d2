//! Error types for forest-loss
//!
//! Covers region resolution, backend availability, per-tile reduction and
//! series-level failures, plus fuzzy "did you mean" suggestions for country names.

use std::fmt;
use strsim::{jaro_winkler, normalized_levenshtein};

/// Find the closest known country name using character similarity.
///
/// Scores are 70% Jaro-Winkler and 30% normalized Levenshtein, with a small
/// bonus when the first few characters agree. Matches below 0.75 are discarded.
fn find_best_fuzzy_match(input: &str, candidates: &[String]) -> Option<String> {
    let input_lower = input.trim().to_lowercase();
    if input_lower.is_empty() {
        return None;
    }

    let min_threshold = 0.75;
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();

        let jw_score = jaro_winkler(&input_lower, &candidate_lower);
        let lev_score = normalized_levenshtein(&input_lower, &candidate_lower);
        let mut score = (jw_score * 0.7) + (lev_score * 0.3);

        // Country names are often typed by prefix ("Indon", "Braz")
        let prefix_len = input_lower.chars().count().min(5);
        if prefix_len >= 4 {
            let input_prefix: String = input_lower.chars().take(prefix_len).collect();
            let candidate_prefix: String = candidate_lower.chars().take(prefix_len).collect();
            if input_prefix == candidate_prefix {
                score += 0.1;
            }
        }

        if score >= min_threshold && score > best_score {
            best_score = score;
            best_match = Some(candidate.clone());
        }
    }

    best_match
}

/// Suggest a correction for a country name that matched no boundary feature.
///
/// Returns `None` when the name already matches a candidate (ignoring case)
/// or when nothing is close enough to be a plausible typo.
pub fn suggest_region(name: &str, known_names: &[String]) -> Option<String> {
    if let Some(exact) = known_names.iter().find(|n| n.eq_ignore_ascii_case(name.trim())) {
        // Lookups are case-sensitive, so a case-only mismatch is worth reporting
        if exact != name {
            return Some(exact.clone());
        }
        return None;
    }

    find_best_fuzzy_match(name, known_names)
}

/// Main error type for forest-loss operations
#[derive(Debug)]
pub enum Error {
    /// Country name resolved to zero or several boundary features
    Resolution {
        name: String,
        matches: usize,
        suggestion: Option<String>,
    },

    /// Backend could not be reached before any work was started
    BackendUnavailable(String),

    /// Backend rejected our credentials
    Unauthorized(String),

    /// A single reduction exceeded the backend's pixel or complexity limits
    CapacityExceeded(String),

    /// A single grid cell's reduction failed; recovered locally by the reducer
    TileReduction { cell_id: usize, reason: String },

    /// No grid cell produced any grouped data for the whole request
    EmptySeries { country: String, cells: usize },

    /// Backend answered with something we could not use
    Backend(String),

    /// HTTP-specific error
    HttpError(String),

    /// Network connectivity issues (retryable)
    NetworkError(String),

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// Caller deadline or cancellation fired before the request completed
    Cancelled(String),

    /// File I/O error
    IoError(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Resolution {
                name,
                matches,
                suggestion,
            } => {
                if *matches == 0 {
                    write!(f, "Country '{name}' matched no boundary feature")?;
                    if let Some(s) = suggestion {
                        write!(f, ". Did you mean '{s}'?")?;
                    }
                    Ok(())
                } else {
                    write!(
                        f,
                        "Country '{name}' is ambiguous: {matches} boundary features match"
                    )
                }
            }
            Error::BackendUnavailable(msg) => {
                write!(f, "Raster backend unavailable: {msg}")
            }
            Error::Unauthorized(msg) => {
                write!(f, "Raster backend rejected credentials: {msg}")
            }
            Error::CapacityExceeded(msg) => {
                write!(f, "Backend capacity exceeded: {msg}")
            }
            Error::TileReduction { cell_id, reason } => {
                write!(f, "Reduction failed for grid cell {cell_id}: {reason}")
            }
            Error::EmptySeries { country, cells } => {
                write!(
                    f,
                    "No loss data returned for '{country}' from any of {cells} grid cells"
                )
            }
            Error::Backend(msg) => {
                write!(f, "Backend error: {msg}")
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {msg}")
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {msg}")
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {msg}")
            }
            Error::Cancelled(msg) => {
                write!(f, "Cancelled: {msg}")
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else if err.is_decode() {
            Error::Backend(format!("malformed response: {err}"))
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Backend(format!("malformed response: {err}"))
    }
}

/// Convenience result type for forest-loss operations
pub type Result<T> = std::result::Result<T, Error>;
