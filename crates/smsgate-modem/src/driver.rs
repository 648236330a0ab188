//! Driver profiles and the registry that loads them
//!
//! A driver maps logical identifiers (`CMD_*`, `PARAM_*`, `RESPONSE_*`) to
//! literal AT strings. Drivers may inherit from a parent: the parent's
//! resolved map is cloned and the child's keys applied on top when the
//! child is built, so a profile never looks anything up at runtime.
//!
//! # Document format
//!
//! ```json
//! {
//!   "huawei": {
//!     "Huawei E-series USB sticks": {
//!       "generic": {
//!         "RESPONSE_RSSI": "^RSSI:%RSSI%",
//!         "PARAM_WAIT_PROMPT": "0"
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! The optional single non-reserved key under a driver is its description;
//! a further single non-reserved key names the parent.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ModemError, Result};
use crate::template;

/// Name of the built-in fallback driver
pub const GENERIC_DRIVER: &str = "generic";

const RESERVED_PREFIXES: [&str; 3] = ["CMD_", "PARAM_", "RESPONSE_"];

fn is_reserved(key: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// A resolved driver: every template it knows, parent entries included
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverProfile {
    /// Driver name as registered
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Parent this profile was derived from
    pub parent: Option<String>,
    commands: BTreeMap<String, String>,
}

impl DriverProfile {
    /// Create an empty profile
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parent: None,
            commands: BTreeMap::new(),
        }
    }

    /// Derive a profile from `parent`, copying its resolved map
    pub fn derive(name: impl Into<String>, parent: &DriverProfile) -> Self {
        Self {
            name: name.into(),
            description: None,
            parent: Some(parent.name.clone()),
            commands: parent.commands.clone(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set or override one template
    pub fn set(&mut self, id: impl Into<String>, template: impl Into<String>) {
        self.commands.insert(id.into(), template.into());
    }

    /// Raw template for `id`
    pub fn get(&self, id: &str) -> Option<&str> {
        self.commands.get(id).map(String::as_str)
    }

    /// Whether the profile defines `id` with a non-empty template
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some_and(|t| !t.is_empty())
    }

    /// Resolve a command template with variables
    pub fn cmd(&self, id: &str, vars: &[(&'static str, String)]) -> Result<String> {
        let template = self
            .get(id)
            .ok_or_else(|| ModemError::UnknownCommand(id.to_string()))?;
        let vars: HashMap<&str, String> = vars.iter().cloned().collect();
        Ok(template::render(template, &vars))
    }

    /// Resolved parameter value (escapes expanded, no variables)
    pub fn param(&self, id: &str) -> Option<String> {
        self.get(id).map(template::expand_escapes)
    }

    /// Boolean parameter: `1`, `true`, `yes` and `on` are true
    pub fn flag(&self, id: &str) -> bool {
        self.param(id).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the profile has no templates
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The built-in driver speaking plain 3GPP TS 27.005/27.007
    pub fn generic() -> Self {
        let mut driver = DriverProfile::new(GENERIC_DRIVER)
            .with_description("Generic 3GPP TS 27.005 modem (PDU mode)");
        let entries: &[(&str, &str)] = &[
            // Initialization
            ("CMD_RESET", "ATZ"),
            ("CMD_ECHO_OFF", "ATE0"),
            ("CMD_ERROR_VERBOSE", "AT+CMEE=1"),
            // Identification
            ("CMD_MANUFACTURER", "AT+CGMI"),
            ("CMD_MODEL", "AT+CGMM"),
            ("CMD_VERSION", "AT+CGMR"),
            ("CMD_SERIAL", "AT+CGSN"),
            ("CMD_IMSI", "AT+CIMI"),
            // Unsolicited notifications
            ("CMD_ENABLE_CLIP", "AT+CLIP=1"),
            ("CMD_ENABLE_CNMI", "AT+CNMI=2,1,0,2,0"),
            ("CMD_ENABLE_CUSD", "AT+CUSD=1"),
            // Queries
            ("CMD_QUERY_CHARSET", "AT+CSCS?"),
            ("CMD_QUERY_SMS_MODE", "AT+CMGF?"),
            ("CMD_QUERY_STORAGE", "AT+CPMS?"),
            ("CMD_QUERY_SMSC", "AT+CSCA?"),
            ("CMD_QUERY_NETWORK", "AT+COPS?"),
            ("CMD_QUERY_SIGNAL", "AT+CSQ"),
            // Storage
            ("CMD_SET_PDU_MODE", "AT+CMGF=0"),
            (
                "CMD_SET_STORAGE",
                "AT+CPMS=\"%STORAGE%\",\"%STORAGE%\",\"%STORAGE%\"",
            ),
            ("CMD_SELECT_STORAGE", "AT+CPMS=\"%STORAGE%\""),
            ("CMD_LIST_MESSAGES", "AT+CMGL=4"),
            ("CMD_READ_MESSAGE", "AT+CMGR=%INDEX%"),
            ("CMD_DELETE_MESSAGE", "AT+CMGD=%INDEX%"),
            // Sending
            ("CMD_SEND_PDU_LENGTH", "AT+CMGS=%LEN%"),
            ("CMD_SEND_PDU", "%PDU%$1A"),
            // Calls and USSD
            ("CMD_DIAL", "ATD%NUMBER%;"),
            ("CMD_HANGUP", "ATH"),
            ("CMD_ANSWER", "ATA"),
            ("CMD_USSD", "AT+CUSD=1,\"%CODE%\",15"),
            // Parameters
            ("PARAM_TERMINATOR", "$0D"),
            ("PARAM_WAIT_PROMPT", "1"),
            // Final result codes
            ("RESPONSE_OK", "OK"),
            ("RESPONSE_ERROR", "ERROR"),
            ("RESPONSE_NO_CARRIER", "NO CARRIER"),
            ("RESPONSE_NOT_SUPPORTED", "COMMAND NOT SUPPORT"),
            ("RESPONSE_CME", "+CME ERROR: %CODE%"),
            ("RESPONSE_CMS", "+CMS ERROR: %CODE%"),
            ("RESPONSE_PROMPT", ">"),
            // Information and unsolicited responses
            ("RESPONSE_CMTI", "+CMTI: %STORAGE%,%INDEX%"),
            ("RESPONSE_CDSI", "+CDSI: %STORAGE%,%INDEX%"),
            ("RESPONSE_CMT", "+CMT: %ALPHA%,%LENGTH%"),
            ("RESPONSE_CDS", "+CDS: %LENGTH%"),
            ("RESPONSE_CMGR", "+CMGR: %STAT%,%ALPHA%,%LENGTH%"),
            ("RESPONSE_CMGL", "+CMGL: %INDEX%,%STAT%,%ALPHA%,%LENGTH%"),
            ("RESPONSE_CMGS", "+CMGS: %REFERENCE%"),
            ("RESPONSE_RING", "RING"),
            ("RESPONSE_CLIP", "+CLIP: %NUMBER%,%TYPE%"),
            ("RESPONSE_CUSD", "+CUSD: %STATUS%,%MESSAGE%,%DCS%"),
            ("RESPONSE_CSQ", "+CSQ: %RSSI%,%BER%"),
            ("RESPONSE_CPMS", "+CPMS: %STORAGE%,%USED%,%TOTAL%"),
            ("RESPONSE_CSCA", "+CSCA: %SMSC%,%TYPE%"),
            ("RESPONSE_COPS", "+COPS: %MODE%,%FORMAT%,%OPERATOR%"),
            ("RESPONSE_CSCS", "+CSCS: %CHARSET%"),
            ("RESPONSE_CMGF", "+CMGF: %MODE%"),
        ];
        for (id, template) in entries {
            driver.set(*id, *template);
        }
        driver
    }
}

/// One parsed driver entry, before its parent is resolved
struct PendingDriver {
    name: String,
    description: Option<String>,
    parent: Option<String>,
    overrides: Vec<(String, String)>,
}

/// Named driver profiles, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<DriverProfile>>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding only the generic driver
    pub fn with_generic() -> Self {
        let mut registry = Self::new();
        registry.drivers.insert(
            GENERIC_DRIVER.to_string(),
            Arc::new(DriverProfile::generic()),
        );
        registry
    }

    /// Load drivers from a JSON document on disk
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let count = self.load_str(&text)?;
        info!(path = %path.display(), drivers = count, "loaded modem drivers");
        Ok(count)
    }

    /// Load drivers from a JSON document
    ///
    /// Entries may appear in any order; a parent defined in the same document
    /// is resolved before its children. Returns the number of drivers added.
    pub fn load_str(&mut self, text: &str) -> Result<usize> {
        let root: Value = serde_json::from_str(text)?;
        let root = root.as_object().ok_or_else(|| {
            ModemError::InvalidDriverConfig("top level must be an object".to_string())
        })?;

        let mut pending = root
            .iter()
            .map(|(name, value)| parse_entry(name, value))
            .collect::<Result<Vec<_>>>()?;

        let mut added = 0;
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for entry in pending {
                let parent = match &entry.parent {
                    Some(parent) => match self.get(parent) {
                        Some(profile) => Some(profile),
                        None => {
                            waiting.push(entry);
                            continue;
                        }
                    },
                    None => None,
                };
                let mut profile = match parent {
                    Some(parent) => DriverProfile::derive(&entry.name, &parent),
                    None => DriverProfile::new(&entry.name),
                };
                profile.description = entry.description;
                for (id, template) in entry.overrides {
                    profile.set(id, template);
                }
                self.add(profile)?;
                added += 1;
            }
            if waiting.len() == before {
                let entry = &waiting[0];
                return Err(ModemError::UnknownDriver(format!(
                    "{} (parent of {})",
                    entry.parent.as_deref().unwrap_or_default(),
                    entry.name
                )));
            }
            pending = waiting;
        }
        Ok(added)
    }

    /// Register a profile; names are unique regardless of case
    pub fn add(&mut self, profile: DriverProfile) -> Result<()> {
        let key = profile.name.to_ascii_lowercase();
        if self.drivers.contains_key(&key) {
            return Err(ModemError::DuplicateDriver(profile.name));
        }
        debug!(driver = %profile.name, parent = ?profile.parent, templates = profile.len(), "registered driver");
        self.drivers.insert(key, Arc::new(profile));
        Ok(())
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> Option<Arc<DriverProfile>> {
        self.drivers.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Find the driver best matching an identification string
    ///
    /// An exact (case-insensitive) name wins; otherwise the longest
    /// registered name contained in `text`.
    pub fn match_name(&self, text: &str) -> Option<Arc<DriverProfile>> {
        let text = text.trim().to_ascii_lowercase();
        if let Some(exact) = self.drivers.get(&text) {
            return Some(exact.clone());
        }
        self.drivers
            .iter()
            .filter(|(name, _)| !name.is_empty() && text.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, profile)| profile.clone())
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no drivers are registered
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.values().map(|d| d.name.clone()).collect();
        names.sort();
        names
    }
}

fn parse_entry(name: &str, value: &Value) -> Result<PendingDriver> {
    let invalid = |reason: &str| ModemError::InvalidDriverConfig(format!("{}: {}", name, reason));

    let mut object: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| invalid("driver entry must be an object"))?;
    let mut overrides = Vec::new();
    let mut labels = Vec::new();

    // At most two nesting levels: description, then parent
    loop {
        let mut plain = Vec::new();
        for (key, value) in object {
            if is_reserved(key) {
                let template = value
                    .as_str()
                    .ok_or_else(|| invalid(&format!("{} must be a string", key)))?;
                template::check_escapes(template)?;
                overrides.push((key.clone(), template.to_string()));
            } else {
                plain.push((key, value));
            }
        }
        match plain.as_slice() {
            [] => break,
            [(key, inner)] if labels.len() < 2 => {
                labels.push((*key).clone());
                object = inner
                    .as_object()
                    .ok_or_else(|| invalid(&format!("{} must be an object", key)))?;
            }
            _ => return Err(invalid("unexpected non-template keys")),
        }
    }

    let mut labels = labels.into_iter();
    Ok(PendingDriver {
        name: name.to_string(),
        description: labels.next(),
        parent: labels.next(),
        overrides,
    })
}
