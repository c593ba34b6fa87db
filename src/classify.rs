//! Rule-based error classification
//!
//! An [`ErrorClassifier`] holds an ordered table of [`Rule`]s. Each rule pairs
//! a [`Matcher`] over the error's type name and message with an explanation
//! template. Rules are tried in table order; the first match wins. When
//! nothing matches, a generic explanation is built from the type name and
//! message. Classification is pure: same input, same output.
//!
//! Templates may use `{type}`, `{message}` and `{code}` (the first
//! vendor-style error code found in the message, e.g. `ORA-12154`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad family an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Database,
    Authentication,
    Network,
    Timeout,
    Http,
    Tls,
    Serialization,
    Data,
    Arithmetic,
    Type,
    Lookup,
    Index,
    Attribute,
    FileSystem,
    Permission,
    Value,
    Memory,
    Recursion,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Database => "database",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Http => "http",
            ErrorCategory::Tls => "tls",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Data => "data",
            ErrorCategory::Arithmetic => "arithmetic",
            ErrorCategory::Type => "type",
            ErrorCategory::Lookup => "lookup",
            ErrorCategory::Index => "index",
            ErrorCategory::Attribute => "attribute",
            ErrorCategory::FileSystem => "filesystem",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Value => "value",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Recursion => "recursion",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Predicate over an error's type name and message
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Type name equals (case-sensitive)
    TypeIs(String),
    /// Type name contains (case-insensitive)
    TypeContains(String),
    /// Message contains (case-insensitive)
    MessageContains(String),
    /// Message matches a structured code pattern
    Code(Regex),
    /// Every inner matcher matches
    All(Vec<Matcher>),
    /// At least one inner matcher matches
    Any(Vec<Matcher>),
}

impl Matcher {
    pub fn type_is(name: &str) -> Self {
        Matcher::TypeIs(name.to_string())
    }

    pub fn type_contains(fragment: &str) -> Self {
        Matcher::TypeContains(fragment.to_ascii_lowercase())
    }

    pub fn message_contains(fragment: &str) -> Self {
        Matcher::MessageContains(fragment.to_ascii_lowercase())
    }

    /// Vendor error code, e.g. `vendor_code("ORA", Some("12154"))`
    ///
    /// With `code = None` any code with that prefix matches.
    pub fn vendor_code(prefix: &str, code: Option<&str>) -> Self {
        let digits = match code {
            Some(code) => regex::escape(code),
            None => r"\d{3,5}".to_string(),
        };
        Self::message_pattern(&format!(r"\b{}-{}\b", regex::escape(prefix), digits))
    }

    /// Case-insensitive regex over the message, e.g. `r"\b404\b"`
    pub fn message_pattern(pattern: &str) -> Self {
        match Regex::new(&format!("(?i){pattern}")) {
            Ok(re) => Matcher::Code(re),
            // invalid pattern; match nothing
            Err(_) => Matcher::Any(Vec::new()),
        }
    }

    fn matches(&self, type_name: &str, message_lower: &str, message: &str) -> bool {
        match self {
            Matcher::TypeIs(name) => type_name == name,
            Matcher::TypeContains(fragment) => type_name.to_ascii_lowercase().contains(fragment),
            Matcher::MessageContains(fragment) => message_lower.contains(fragment),
            Matcher::Code(re) => re.is_match(message),
            Matcher::All(inner) => {
                !inner.is_empty() && inner.iter().all(|m| m.matches(type_name, message_lower, message))
            }
            Matcher::Any(inner) => inner.iter().any(|m| m.matches(type_name, message_lower, message)),
        }
    }
}

/// One row of the classification table
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub category: ErrorCategory,
    pub matcher: Matcher,
    pub template: String,
}

impl Rule {
    pub fn new(
        name: &'static str,
        category: ErrorCategory,
        matcher: Matcher,
        template: impl Into<String>,
    ) -> Self {
        Self {
            name,
            category,
            matcher,
            template: template.into(),
        }
    }
}

/// Result of classifying one error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub explanation: String,
    /// Name of the matching rule; `None` for the fallback
    pub rule: Option<String>,
}

impl Classification {
    pub fn is_fallback(&self) -> bool {
        self.rule.is_none()
    }
}

/// Ordered rule table
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<Rule>,
    code_pattern: Option<Regex>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl ErrorClassifier {
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            code_pattern: Regex::new(r"(?i)\b[A-Z]{2,6}-\d{3,5}\b").ok(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Add a rule at the lowest priority
    pub fn push_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Add a rule at `index` (0 = highest priority)
    pub fn insert_rule(&mut self, index: usize, rule: Rule) {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
    }

    /// Classify an error by type name and message
    pub fn classify(&self, type_name: &str, message: &str) -> Classification {
        let message_lower = message.to_lowercase();
        for rule in &self.rules {
            if rule.matcher.matches(type_name, &message_lower, message) {
                return Classification {
                    category: rule.category,
                    explanation: self.fill(&rule.template, type_name, message),
                    rule: Some(rule.name.to_string()),
                };
            }
        }
        Classification {
            category: ErrorCategory::Unknown,
            explanation: fallback_explanation(type_name, message),
            rule: None,
        }
    }

    /// Explanation text only
    pub fn explain(&self, type_name: &str, message: &str) -> String {
        self.classify(type_name, message).explanation
    }

    fn fill(&self, template: &str, type_name: &str, message: &str) -> String {
        let code = self
            .code_pattern
            .as_ref()
            .and_then(|re| re.find(message))
            .map(|m| m.as_str())
            .unwrap_or("");
        template
            .replace("{type}", type_name)
            .replace("{message}", message)
            .replace("{code}", code)
    }
}

fn fallback_explanation(type_name: &str, message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        format!("A {type_name} error occurred. No further details were provided.")
    } else {
        format!("A {type_name} error occurred: {message}")
    }
}

/// The built-in table, highest priority first
pub fn default_rules() -> Vec<Rule> {
    use ErrorCategory as C;
    use Matcher as M;

    let ora = |code: &str| M::vendor_code("ORA", Some(code));

    vec![
        // Oracle: specific codes before the generic vendor rule
        Rule::new(
            "oracle_table_missing",
            C::Database,
            ora("00942"),
            "Oracle could not find the table or view ({code}). Check the name, the schema prefix, and that this user has been granted access to it.",
        ),
        Rule::new(
            "oracle_bad_credentials",
            C::Authentication,
            ora("01017"),
            "Oracle rejected the username or password ({code}). Verify the credentials and that the account is not locked.",
        ),
        Rule::new(
            "oracle_account_locked",
            C::Authentication,
            ora("28000"),
            "The Oracle account is locked ({code}). A DBA must unlock it before connecting again.",
        ),
        Rule::new(
            "oracle_tns_unresolved",
            C::Network,
            ora("12154"),
            "Oracle could not resolve the connect identifier ({code}). The TNS alias or connection string is wrong, or tnsnames.ora is missing the entry.",
        ),
        Rule::new(
            "oracle_no_listener",
            C::Network,
            ora("12541"),
            "No Oracle listener is running at the given host and port ({code}). Check that the database is up and the port is correct.",
        ),
        Rule::new(
            "oracle_unknown_service",
            C::Network,
            ora("12514"),
            "The Oracle listener does not know the requested service name ({code}). Check the service name in the connection string.",
        ),
        Rule::new(
            "oracle_invalid_number",
            C::Data,
            ora("01722"),
            "Oracle could not convert a value to a number ({code}). A text column or bind value contains non-numeric data.",
        ),
        Rule::new(
            "oracle_null_insert",
            C::Data,
            ora("01400"),
            "A NULL was inserted into a NOT NULL column ({code}). Provide a value for every required column.",
        ),
        Rule::new(
            "oracle_unique_violation",
            C::Data,
            ora("00001"),
            "A unique constraint was violated ({code}). A row with the same key already exists.",
        ),
        Rule::new(
            "oracle_no_data",
            C::Lookup,
            ora("01403"),
            "The query returned no rows ({code}) where exactly one was expected.",
        ),
        Rule::new(
            "oracle_generic",
            C::Database,
            M::vendor_code("ORA", None),
            "Oracle reported error {code}. Look the code up in the Oracle error reference for the exact cause.",
        ),
        // Other databases
        Rule::new(
            "postgres_auth",
            C::Authentication,
            M::message_contains("password authentication failed"),
            "The database rejected the login. Check the username, password and pg_hba.conf rules.",
        ),
        Rule::new(
            "sql_relation_missing",
            C::Database,
            M::All(vec![M::message_contains("relation"), M::message_contains("does not exist")]),
            "The database table referenced by the query does not exist. Check the table name and search path.",
        ),
        // TLS before generic network so certificate failures are named
        Rule::new(
            "tls_certificate",
            C::Tls,
            M::Any(vec![
                M::type_contains("ssl"),
                M::type_contains("tls"),
                M::message_contains("certificate"),
                M::message_contains("ssl"),
            ]),
            "A secure connection could not be established: the TLS/SSL handshake or certificate verification failed.",
        ),
        Rule::new(
            "timeout",
            C::Timeout,
            M::Any(vec![
                M::type_contains("timeout"),
                M::message_contains("timed out"),
                M::message_contains("timeout"),
            ]),
            "The operation took too long and timed out. The remote service may be slow or unreachable.",
        ),
        Rule::new(
            "connection_failed",
            C::Network,
            M::Any(vec![
                M::type_contains("connection"),
                M::message_contains("connection refused"),
                M::message_contains("failed to establish"),
                M::message_contains("connection failed"),
                M::message_contains("connection reset"),
                M::message_contains("could not connect"),
            ]),
            "A network connection could not be made. The server may be down, the address wrong, or a firewall in the way.",
        ),
        Rule::new(
            "http_client_error",
            C::Http,
            M::Any(vec![
                M::message_contains("client error"),
                M::message_pattern(r"\b404\b"),
                M::message_contains("403 forbidden"),
                M::message_contains("401 unauthorized"),
            ]),
            "The server rejected the HTTP request (4xx status). Check the URL, parameters and credentials.",
        ),
        Rule::new(
            "http_server_error",
            C::Http,
            M::Any(vec![
                M::message_contains("server error"),
                M::message_contains("500 internal"),
                M::message_contains("502 bad gateway"),
                M::message_contains("503 service unavailable"),
            ]),
            "The server failed while handling the HTTP request (5xx status). The problem is on the remote side.",
        ),
        // Parsing and data shape
        Rule::new(
            "json_decode",
            C::Serialization,
            M::Any(vec![
                M::type_contains("json"),
                M::message_contains("expecting property name"),
                M::message_contains("expecting value"),
                M::message_contains("eof while parsing"),
                M::All(vec![M::message_contains("expected"), M::message_contains("at line")]),
            ]),
            "The input is not valid JSON. Look for a missing comma, an unquoted key, or truncated data near the reported position.",
        ),
        Rule::new(
            "length_mismatch",
            C::Data,
            M::Any(vec![
                M::message_contains("length of values does not match"),
                M::message_contains("length mismatch"),
            ]),
            "Two collections that must line up have different lengths.",
        ),
        Rule::new(
            "numeric_required",
            C::Type,
            M::message_contains("requires numeric"),
            "A numeric operation was applied to non-numeric data.",
        ),
        // Language-level failures
        Rule::new(
            "division_by_zero",
            C::Arithmetic,
            M::Any(vec![
                M::type_is("ZeroDivisionError"),
                M::message_contains("divide by zero"),
                M::message_contains("division by zero"),
            ]),
            "A number was divided by zero. The divisor was zero at the moment of the division.",
        ),
        Rule::new(
            "missing_key",
            C::Lookup,
            M::Any(vec![
                M::type_is("KeyError"),
                M::message_contains("key not found"),
                M::message_contains("not found in"),
            ]),
            "A key was looked up that does not exist in the map or table.",
        ),
        Rule::new(
            "index_out_of_range",
            C::Index,
            M::Any(vec![
                M::type_is("IndexError"),
                M::message_contains("index out of bounds"),
                M::message_contains("index out of range"),
            ]),
            "An index was outside the bounds of the collection.",
        ),
        Rule::new(
            "unwrap_none",
            C::Value,
            M::message_contains("on a `none` value"),
            "An optional value was expected to be present but was empty (None).",
        ),
        Rule::new(
            "attribute_missing",
            C::Attribute,
            M::Any(vec![M::type_is("AttributeError"), M::message_contains("has no attribute")]),
            "A field or attribute was accessed that the value does not have.",
        ),
        Rule::new(
            "file_not_found",
            C::FileSystem,
            M::Any(vec![
                M::type_is("FileNotFoundError"),
                M::message_contains("no such file or directory"),
            ]),
            "A file or directory that the program expected does not exist. Check the path and the working directory.",
        ),
        Rule::new(
            "permission_denied",
            C::Permission,
            M::Any(vec![M::type_is("PermissionError"), M::message_contains("permission denied")]),
            "The operating system refused access. The process lacks permission for this file or resource.",
        ),
        Rule::new(
            "out_of_memory",
            C::Memory,
            M::Any(vec![
                M::type_is("MemoryError"),
                M::message_contains("out of memory"),
                M::message_contains("memory allocation"),
            ]),
            "The program ran out of memory.",
        ),
        Rule::new(
            "recursion_limit",
            C::Recursion,
            M::Any(vec![
                M::type_is("RecursionError"),
                M::message_contains("stack overflow"),
                M::message_contains("maximum recursion depth"),
            ]),
            "Calls nested too deeply, usually because of unbounded recursion.",
        ),
        Rule::new(
            "type_mismatch",
            C::Type,
            M::Any(vec![
                M::type_is("TypeError"),
                M::message_contains("unsupported operand"),
                M::message_contains("mismatched types"),
            ]),
            "An operation received a value of the wrong type.",
        ),
        Rule::new(
            "invalid_value",
            C::Value,
            M::Any(vec![
                M::type_is("ValueError"),
                M::type_contains("parseinterror"),
                M::type_contains("parsefloaterror"),
                M::message_contains("invalid digit"),
                M::message_contains("invalid float literal"),
            ]),
            "A value had the right type but an invalid content, for example text that is not a number.",
        ),
    ]
}
