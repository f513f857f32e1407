//! Protocol commands
//!
//! Defines the fixed commands the recorder sends to OPS24x modules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration queries issued during the handshake.
///
/// Each query makes the module answer with one or more `{key:value}` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryCode {
    /// `??` - module information
    ModuleInfo,
    /// `?N` - Nyquist / sampling setting
    Nyquist,
    /// `?D` - direction reporting
    Direction,
    /// `?V` - firmware version
    Version,
    /// `?B` - blanking mode
    Blanking,
    /// `R?` - speed filter
    SpeedFilter,
    /// `?F` - decimal precision
    Precision,
    /// `F?` - reported digits
    Format,
    /// `U?` - speed units
    Units,
    /// `?Z` - power mode
    PowerMode,
}

impl QueryCode {
    /// Every query in the order the handshake sends them.
    ///
    /// The module does not require a particular order; this one is fixed so runs are
    /// reproducible.
    pub const ALL: [QueryCode; 10] = [
        QueryCode::ModuleInfo,
        QueryCode::Nyquist,
        QueryCode::Direction,
        QueryCode::Version,
        QueryCode::Blanking,
        QueryCode::SpeedFilter,
        QueryCode::Precision,
        QueryCode::Format,
        QueryCode::Units,
        QueryCode::PowerMode,
    ];

    /// Two-character wire code
    pub fn code(&self) -> &'static str {
        match self {
            QueryCode::ModuleInfo => "??",
            QueryCode::Nyquist => "?N",
            QueryCode::Direction => "?D",
            QueryCode::Version => "?V",
            QueryCode::Blanking => "?B",
            QueryCode::SpeedFilter => "R?",
            QueryCode::Precision => "?F",
            QueryCode::Format => "F?",
            QueryCode::Units => "U?",
            QueryCode::PowerMode => "?Z",
        }
    }

    /// Look up a query by its wire code
    pub fn from_code(code: &str) -> Option<QueryCode> {
        Self::ALL.iter().copied().find(|q| q.code() == code)
    }
}

impl fmt::Display for QueryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Fixed commands sent by the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Prefix every report with the module's timer value ('OT')
    EnableTimeReport,

    /// Emit an empty line when no object is in range ('BL')
    EnableRangeBlanking,

    /// Reset the module timer to zero ('C=0')
    ResetTimer,

    /// Query part of the module configuration
    ConfigQuery(QueryCode),
}

impl Command {
    /// Name used for this command in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::EnableTimeReport => "OPS24X_TIME_REPORT",
            Command::EnableRangeBlanking => "OPS24X_RANGE_BLANKING",
            Command::ResetTimer => "OPS24X_RESET_RADAR_TIMER",
            Command::ConfigQuery(_) => "CONFIG_QUERY",
        }
    }

    /// Command text as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::EnableTimeReport => "OT",
            Command::EnableRangeBlanking => "BL",
            Command::ResetTimer => "C=0\n",
            Command::ConfigQuery(query) => query.code(),
        }
    }

    /// Check if this command expects a configuration response
    pub fn expects_response(&self) -> bool {
        matches!(self, Command::ConfigQuery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_query_codes_are_distinct() {
        let codes: HashSet<&str> = QueryCode::ALL.iter().map(|q| q.code()).collect();
        assert_eq!(codes.len(), 10);
        assert!(codes.iter().all(|c| c.len() == 2));
    }

    #[test]
    fn test_query_code_lookup() {
        assert_eq!(QueryCode::from_code("R?"), Some(QueryCode::SpeedFilter));
        assert_eq!(QueryCode::from_code("??"), Some(QueryCode::ModuleInfo));
        assert_eq!(QueryCode::from_code("XX"), None);
    }

    #[test]
    fn test_command_strings() {
        assert_eq!(Command::EnableTimeReport.as_str(), "OT");
        assert_eq!(Command::ResetTimer.as_str(), "C=0\n");
        assert_eq!(Command::ConfigQuery(QueryCode::Units).as_str(), "U?");
    }

    #[test]
    fn test_command_response() {
        assert!(Command::ConfigQuery(QueryCode::Version).expects_response());
        assert!(!Command::ResetTimer.expects_response());
        assert!(!Command::EnableRangeBlanking.expects_response());
    }
}
