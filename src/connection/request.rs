//! Request and response model.
//!
//! Only what the resilience layer needs is modelled: enough to route a request
//! by its target DN and to tell security-sensitive exchanges apart. Encoding and
//! attribute semantics belong to the protocol layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::connection::error::ResultCode;

/// OID of the StartTLS extended operation.
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// OID of the password modify extended operation.
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

/// Bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindRequest {
    Simple { name: String, password: String },
    Sasl { mechanism: String, authentication_id: String },
}

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }

    /// Base-object search of the root DSE returning no attributes.
    ///
    /// Cheap and side-effect free, which makes it the default liveness probe.
    pub fn root_dse_probe() -> Self {
        Self {
            base: String::new(),
            scope: SearchScope::BaseObject,
            filter: "(objectClass=*)".to_string(),
            attributes: vec!["1.1".to_string()],
        }
    }
}

/// A single modification of an entry attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub operation: ModificationType,
    pub attribute: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
}

/// A directory request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Bind(BindRequest),
    StartTls,
    Search(SearchRequest),
    Add {
        name: String,
        attributes: Vec<(String, Vec<String>)>,
    },
    Modify {
        name: String,
        changes: Vec<Modification>,
    },
    Delete {
        name: String,
    },
    Compare {
        name: String,
        attribute: String,
        value: String,
    },
    ModifyDn {
        name: String,
        new_rdn: String,
        delete_old_rdn: bool,
    },
    PasswordModify {
        user_identity: Option<String>,
    },
    Extended {
        oid: String,
        value: Option<Vec<u8>>,
    },
    Abandon {
        message_id: i32,
    },
}

impl Request {
    /// Return true for exchanges that change the security state of the connection.
    pub fn is_security_sensitive(&self) -> bool {
        match self {
            Request::Bind(_) | Request::StartTls => true,
            Request::Extended { oid, .. } => oid == START_TLS_OID,
            _ => false,
        }
    }

    /// The DN of the entry this request targets, if it can be determined.
    pub fn target_dn(&self) -> Option<Dn> {
        match self {
            Request::Search(search) => Dn::parse(&search.base),
            Request::Modify { name, .. }
            | Request::Add { name, .. }
            | Request::Delete { name }
            | Request::Compare { name, .. }
            | Request::ModifyDn { name, .. } => Dn::parse(name),
            Request::Bind(BindRequest::Simple { name, .. }) => Dn::parse(name),
            Request::Bind(BindRequest::Sasl { authentication_id, .. }) => {
                Dn::from_authzid(authentication_id)
            }
            Request::PasswordModify { user_identity } => {
                user_identity.as_deref().and_then(Dn::from_authzid)
            }
            Request::StartTls | Request::Extended { .. } | Request::Abandon { .. } => None,
        }
    }

    /// Short operation name for logs and metrics.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Request::Bind(_) => "bind",
            Request::StartTls => "start_tls",
            Request::Search(_) => "search",
            Request::Add { .. } => "add",
            Request::Modify { .. } => "modify",
            Request::Delete { .. } => "delete",
            Request::Compare { .. } => "compare",
            Request::ModifyDn { .. } => "modify_dn",
            Request::PasswordModify { .. } => "password_modify",
            Request::Extended { .. } => "extended",
            Request::Abandon { .. } => "abandon",
        }
    }
}

/// A normalized distinguished name, used as a routing key.
///
/// Attribute types and values compare case-insensitively and whitespace around
/// separators is ignored. The empty string is the root DN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dn {
    normalized: String,
}

impl Dn {
    /// Parse a DN string, returning `None` if it is not syntactically a DN.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Some(Self {
                normalized: String::new(),
            });
        }

        let mut rdns = Vec::new();
        for rdn in split_unescaped(value, ',') {
            let (attr, val) = rdn.split_once('=')?;
            let attr = attr.trim();
            let val = val.trim();
            if attr.is_empty() || val.is_empty() {
                return None;
            }
            rdns.push(format!("{}={}", attr.to_ascii_lowercase(), val.to_lowercase()));
        }
        Some(Self {
            normalized: rdns.join(","),
        })
    }

    /// Extract a DN from an authorization id of the form `dn:<dn>`.
    pub fn from_authzid(authzid: &str) -> Option<Self> {
        authzid.strip_prefix("dn:").and_then(Dn::parse)
    }

    /// Return true for the root DN.
    pub fn is_root(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Normalized string form.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

fn split_unescaped(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(&value[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&value[start..]);
    parts
}

/// A search result entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<(String, Vec<String>)>,
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result_code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub entries: Vec<SearchResultEntry>,
}

impl Response {
    /// A successful response with no entries.
    pub fn success() -> Self {
        Self {
            result_code: ResultCode::Success,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_entries(entries: Vec<SearchResultEntry>) -> Self {
        Self {
            entries,
            ..Self::success()
        }
    }
}
