use std::collections::HashMap;
use std::fmt;
use std::path::Path;
#[cfg(feature = "oui-db")]
use std::sync::Arc;

use anyhow::{Context, Result};

/// MAC to manufacturer lookup.
pub trait VendorLookup: Send + Sync {
    fn lookup_vendor(&self, mac: &str) -> Option<String>;
}

/// Virtual NICs and a few vendors whose IEEE names are unhelpful.
const BUILTIN_OUIS: &[(&str, &str)] = &[
    ("000C29", "VMware, Inc."),
    ("005056", "VMware, Inc."),
    ("001132", "Synology Incorporated"),
    ("00155D", "Microsoft Corporation"),
    ("0017F2", "Apple, Inc."),
    ("001B54", "Cisco Systems, Inc"),
    ("080027", "PCS Systemtechnik GmbH"),
    ("245EBE", "QNAP Systems, Inc."),
    ("28CFE9", "Apple, Inc."),
    ("3C5AB4", "Google, Inc."),
    ("44D9E7", "Ubiquiti Inc"),
    ("525400", "QEMU virtual NIC"),
    ("7483C2", "Ubiquiti Inc"),
    ("A4910B", "Cisco Systems, Inc"),
    ("B827EB", "Raspberry Pi Foundation"),
    ("D83ADD", "Raspberry Pi Trading Ltd"),
    ("DCA632", "Raspberry Pi Trading Ltd"),
    ("E45F01", "Raspberry Pi Trading Ltd"),
    ("F4F26D", "TP-LINK TECHNOLOGIES CO.,LTD."),
    ("F8E43B", "ASIX Electronics Corporation"),
];

/// The IEEE MA-L registry embedded by `mac_oui`.
#[derive(Clone)]
pub struct IeeeRegistry {
    #[cfg(feature = "oui-db")]
    db: Arc<mac_oui::Oui>,
}

impl IeeeRegistry {
    /// Parse the embedded registry. `None` when the crate was built without
    /// it or the bundled CSV fails to load.
    #[cfg(feature = "oui-db")]
    pub fn embedded() -> Option<Self> {
        match mac_oui::Oui::default() {
            Ok(db) => Some(Self { db: Arc::new(db) }),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load IEEE OUI registry");
                None
            }
        }
    }

    #[cfg(not(feature = "oui-db"))]
    pub fn embedded() -> Option<Self> {
        None
    }

    #[cfg(feature = "oui-db")]
    fn lookup(&self, mac: &str) -> Option<String> {
        match self.db.lookup_by_mac(mac) {
            Ok(entry) => entry.map(|entry| entry.company_name.trim().to_string()),
            Err(e) => {
                tracing::trace!(%mac, error = %e, "OUI registry lookup failed");
                None
            }
        }
    }

    #[cfg(not(feature = "oui-db"))]
    fn lookup(&self, _mac: &str) -> Option<String> {
        None
    }
}

impl fmt::Debug for IeeeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IeeeRegistry")
    }
}

/// OUI prefix tables, keyed by the first three octets as six uppercase hex
/// digits. Lookup order: operator overrides, the IEEE registry, builtins.
#[derive(Debug, Clone, Default)]
pub struct OuiTable {
    overrides: HashMap<String, String>,
    registry: Option<IeeeRegistry>,
    builtin: HashMap<String, String>,
}

/// Leading six hex digits of `text`, skipping `:`, `-` and `.` separators.
/// Returns the prefix and the rest of the input after it.
fn split_oui(text: &str) -> Option<(String, &str)> {
    let mut prefix = String::with_capacity(6);
    for (idx, c) in text.char_indices() {
        if c.is_ascii_hexdigit() {
            prefix.push(c.to_ascii_uppercase());
            if prefix.len() == 6 {
                return Some((prefix, &text[idx + 1..]));
            }
        } else if !matches!(c, ':' | '-' | '.') {
            return None;
        }
    }
    None
}

/// `AA:BB:CC:DD:EE:FF`, the form the registry parser accepts.
fn colon_mac(mac: &str) -> Option<String> {
    let digits: String = mac.chars().filter(char::is_ascii_hexdigit).collect();
    if digits.len() != 12 || mac.chars().any(|c| !c.is_ascii_hexdigit() && !matches!(c, ':' | '-' | '.')) {
        return None;
    }
    let octets: Vec<&str> = (0..6).map(|i| &digits[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":").to_ascii_uppercase())
}

impl OuiTable {
    /// Builtin entries only.
    pub fn builtin() -> Self {
        let builtin = BUILTIN_OUIS
            .iter()
            .map(|(oui, vendor)| ((*oui).to_string(), (*vendor).to_string()))
            .collect();
        Self { builtin, ..Self::default() }
    }

    /// Builtin entries behind the full IEEE registry, when compiled in.
    pub fn standard() -> Self {
        Self { registry: IeeeRegistry::embedded(), ..Self::builtin() }
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    /// Number of override and builtin prefixes; the registry is not counted.
    pub fn len(&self) -> usize {
        self.overrides.len() + self.builtin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.registry.is_none()
    }

    /// Merge `OUI<sep>Vendor` lines as overrides, later entries win. Blank
    /// lines, `#` comments and lines without a valid prefix are skipped.
    pub fn extend_from_str(&mut self, contents: &str) -> usize {
        let mut added = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((oui, rest)) = split_oui(line) else {
                continue;
            };
            let vendor = rest.trim_start_matches([':', '-', '\t', ' ', ',']).trim();
            if vendor.is_empty() {
                continue;
            }
            self.overrides.insert(oui, vendor.to_string());
            added += 1;
        }
        added
    }

    /// Standard table plus the overrides in `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vendor file {}", path.display()))?;
        let mut table = Self::standard();
        let added = table.extend_from_str(&contents);
        tracing::info!(path = %path.display(), added, "loaded vendor overrides");
        Ok(table)
    }

    /// Standard table, with overrides from `path` when given. A broken
    /// vendor file only costs the overrides.
    pub fn load(path: Option<&str>) -> Self {
        let table = match path {
            Some(path) => Self::from_file(Path::new(path)).unwrap_or_else(|e| {
                tracing::warn!(error = %format!("{e:#}"), "ignoring vendor file");
                Self::standard()
            }),
            None => Self::standard(),
        };
        if !table.has_registry() {
            tracing::info!("IEEE OUI registry unavailable, using builtin vendor table");
        }
        table
    }
}

impl VendorLookup for OuiTable {
    fn lookup_vendor(&self, mac: &str) -> Option<String> {
        let mac = mac.trim();
        let (oui, _) = split_oui(mac)?;
        if let Some(vendor) = self.overrides.get(&oui) {
            return Some(vendor.clone());
        }
        if let Some(vendor) =
            self.registry.as_ref().zip(colon_mac(mac)).and_then(|(registry, mac)| registry.lookup(&mac))
        {
            return Some(vendor);
        }
        self.builtin.get(&oui).cloned()
    }
}
