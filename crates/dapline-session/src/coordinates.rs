//! Line, column and path conversion between the client and the debugger.
//!
//! The client announces its bases in `initialize` (`linesStartAt1`,
//! `columnsStartAt1`, both defaulting to 1-based) and whether it speaks
//! paths or `file:` URIs (`pathFormat`, defaulting to paths). The debugger
//! backend picks its own.

use dapline_proto::InitializeRequestArguments;
use url::Url;

/// Line/column bases on both sides of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinates {
    /// Client lines are 1-based.
    pub client_lines_start_at1: bool,
    /// Client columns are 1-based.
    pub client_columns_start_at1: bool,
    /// Debugger lines are 1-based.
    pub debugger_lines_start_at1: bool,
    /// Debugger columns are 1-based.
    pub debugger_columns_start_at1: bool,
    /// Client paths are `file:` URIs.
    pub client_paths_are_uris: bool,
    /// Debugger paths are `file:` URIs.
    pub debugger_paths_are_uris: bool,
}

impl Default for Coordinates {
    fn default() -> Self {
        Self {
            client_lines_start_at1: true,
            client_columns_start_at1: true,
            debugger_lines_start_at1: false,
            debugger_columns_start_at1: false,
            client_paths_are_uris: false,
            debugger_paths_are_uris: false,
        }
    }
}

impl Coordinates {
    /// Client bases from `initialize`, debugger bases left as they are.
    pub fn with_client(mut self, args: &InitializeRequestArguments) -> Self {
        self.client_lines_start_at1 = args.lines_start_at1.unwrap_or(true);
        self.client_columns_start_at1 = args.columns_start_at1.unwrap_or(true);
        self.client_paths_are_uris = args.path_format.as_deref() == Some("uri");
        self
    }

    /// Set the debugger's bases.
    pub fn with_debugger(mut self, lines_start_at1: bool, columns_start_at1: bool) -> Self {
        self.debugger_lines_start_at1 = lines_start_at1;
        self.debugger_columns_start_at1 = columns_start_at1;
        self
    }

    /// Set whether the debugger speaks `file:` URIs.
    pub fn with_debugger_uris(mut self, paths_are_uris: bool) -> Self {
        self.debugger_paths_are_uris = paths_are_uris;
        self
    }

    /// Convert a debugger path to the client's format.
    pub fn to_client_path(&self, path: &str) -> String {
        convert_path(path, self.debugger_paths_are_uris, self.client_paths_are_uris)
    }

    /// Convert a client path to the debugger's format.
    pub fn to_debugger_path(&self, path: &str) -> String {
        convert_path(path, self.client_paths_are_uris, self.debugger_paths_are_uris)
    }

    /// Convert a debugger line to the client's base.
    pub fn to_client_line(&self, line: i64) -> i64 {
        shift(line, self.debugger_lines_start_at1, self.client_lines_start_at1)
    }

    /// Convert a client line to the debugger's base.
    pub fn to_debugger_line(&self, line: i64) -> i64 {
        shift(line, self.client_lines_start_at1, self.debugger_lines_start_at1)
    }

    /// Convert a debugger column to the client's base.
    pub fn to_client_column(&self, column: i64) -> i64 {
        shift(
            column,
            self.debugger_columns_start_at1,
            self.client_columns_start_at1,
        )
    }

    /// Convert a client column to the debugger's base.
    pub fn to_debugger_column(&self, column: i64) -> i64 {
        shift(
            column,
            self.client_columns_start_at1,
            self.debugger_columns_start_at1,
        )
    }
}

fn shift(value: i64, from_one: bool, to_one: bool) -> i64 {
    match (from_one, to_one) {
        (false, true) => value + 1,
        (true, false) => value - 1,
        _ => value,
    }
}

/// Values that cannot be converted (relative paths, non-`file` URIs) pass
/// through unchanged.
fn convert_path(value: &str, from_uri: bool, to_uri: bool) -> String {
    match (from_uri, to_uri) {
        (false, true) => match Url::from_file_path(value) {
            Ok(url) => url.to_string(),
            Err(()) => {
                tracing::debug!("cannot express `{}` as a file URI", value);
                value.to_string()
            }
        },
        (true, false) => match Url::parse(value) {
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => path.to_string_lossy().into_owned(),
                Err(()) => value.to_string(),
            },
            _ => {
                tracing::debug!("`{}` is not a file URI", value);
                value.to_string()
            }
        },
        _ => value.to_string(),
    }
}
