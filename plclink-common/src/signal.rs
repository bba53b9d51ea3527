use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Modbus data table a signal lives in.
///
/// The kind decides which function codes are used to read and write the
/// signal and whether its value is a bit or a 16-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    /// Discrete input contact (read-only, 1-bit, FC 02).
    DigitalInputContact,
    /// Output coil (read/write, 1-bit, FC 01 / FC 05).
    DigitalOutputCoil,
    /// Input register (read-only, 16-bit, FC 04).
    AnalogInputRegister,
    /// Holding register (read/write, 16-bit, FC 03 / FC 06).
    HoldingRegister,
}

impl SignalKind {
    /// All kinds, in Modbus table order.
    pub const ALL: [SignalKind; 4] = [
        SignalKind::DigitalOutputCoil,
        SignalKind::DigitalInputContact,
        SignalKind::HoldingRegister,
        SignalKind::AnalogInputRegister,
    ];

    /// Canonical snake_case name, used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::DigitalInputContact => "digital_input_contact",
            SignalKind::DigitalOutputCoil => "digital_output_coil",
            SignalKind::AnalogInputRegister => "analog_input_register",
            SignalKind::HoldingRegister => "holding_register",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::DigitalInputContact => "Digital Input Contact",
            SignalKind::DigitalOutputCoil => "Digital Output Coil",
            SignalKind::AnalogInputRegister => "Analog Input Register",
            SignalKind::HoldingRegister => "Holding Register",
        }
    }

    /// Short Modbus table name (`discrete`, `coil`, `input`, `holding`).
    pub fn table(&self) -> &'static str {
        match self {
            SignalKind::DigitalInputContact => "discrete",
            SignalKind::DigitalOutputCoil => "coil",
            SignalKind::AnalogInputRegister => "input",
            SignalKind::HoldingRegister => "holding",
        }
    }

    /// Whether the value is a single bit.
    pub fn is_digital(&self) -> bool {
        matches!(
            self,
            SignalKind::DigitalInputContact | SignalKind::DigitalOutputCoil
        )
    }

    /// Whether the bridge may write this kind.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            SignalKind::DigitalOutputCoil | SignalKind::HoldingRegister
        )
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = Error;

    /// Accepts the human labels ("Digital Input Contact"), snake_case names
    /// and the short table names, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "digital_input_contact" | "discrete" | "discrete_input" => {
                Ok(SignalKind::DigitalInputContact)
            }
            "digital_output_coil" | "coil" => Ok(SignalKind::DigitalOutputCoil),
            "analog_input_register" | "input" | "input_register" => {
                Ok(SignalKind::AnalogInputRegister)
            }
            "holding_register" | "holding" => Ok(SignalKind::HoldingRegister),
            _ => Err(Error::InvalidSignal(format!("unknown signal kind '{}'", s))),
        }
    }
}

impl Serialize for SignalKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SignalKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Observed or written value of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Bit value of a contact or coil.
    Bool(bool),
    /// Raw 16-bit register word.
    Word(u16),
}

impl SignalValue {
    /// Coerce an arbitrary JSON value into the value type of `kind`.
    ///
    /// Digital kinds use loose truthiness: numbers are true when non-zero,
    /// strings such as `"on"`, `"yes"`, `"1"` are parsed. Register kinds take
    /// a number (fraction truncated), a numeric string or a boolean, and
    /// reject anything outside `0..=65535`.
    pub fn coerce(kind: SignalKind, raw: &serde_json::Value) -> Result<Self> {
        if kind.is_digital() {
            coerce_bool(raw).map(SignalValue::Bool)
        } else {
            coerce_word(raw).map(SignalValue::Word)
        }
    }

    /// Bit view of the value (words are true when non-zero).
    pub fn as_bool(&self) -> bool {
        match self {
            SignalValue::Bool(b) => *b,
            SignalValue::Word(w) => *w != 0,
        }
    }

    /// Word view of the value (booleans map to 0/1).
    pub fn as_word(&self) -> u16 {
        match self {
            SignalValue::Bool(b) => u16::from(*b),
            SignalValue::Word(w) => *w,
        }
    }

    /// Convert to the natural representation of `kind`.
    pub fn for_kind(self, kind: SignalKind) -> Self {
        if kind.is_digital() {
            SignalValue::Bool(self.as_bool())
        } else {
            SignalValue::Word(self.as_word())
        }
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Bool(b) => write!(f, "{}", b),
            SignalValue::Word(w) => write!(f, "{}", w),
        }
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

impl From<u16> for SignalValue {
    fn from(v: u16) -> Self {
        SignalValue::Word(v)
    }
}

fn coerce_bool(raw: &serde_json::Value) -> Result<bool> {
    use serde_json::Value;

    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "off" | "0" | "" => Ok(false),
            other => other
                .parse::<f64>()
                .map(|f| f != 0.0)
                .map_err(|_| Error::InvalidValue(format!("cannot interpret '{}' as a bit", s))),
        },
        Value::Null => Err(Error::InvalidValue("value is null".to_string())),
        other => Err(Error::InvalidValue(format!(
            "cannot interpret {} as a bit",
            other
        ))),
    }
}

fn coerce_word(raw: &serde_json::Value) -> Result<u16> {
    use serde_json::Value;

    let number = match raw {
        Value::Bool(b) => return Ok(u16::from(*b)),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::InvalidValue(format!("unrepresentable number {}", n)))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::InvalidValue(format!("'{}' is not a number", s)))?,
        Value::Null => return Err(Error::InvalidValue("value is null".to_string())),
        other => {
            return Err(Error::InvalidValue(format!(
                "cannot interpret {} as a register value",
                other
            )));
        }
    };

    let truncated = number.trunc();
    if !truncated.is_finite() || truncated < 0.0 || truncated > f64::from(u16::MAX) {
        return Err(Error::InvalidValue(format!(
            "{} is outside the 16-bit register range",
            number
        )));
    }

    Ok(truncated as u16)
}

/// A signal definition as supplied by the configuration source.
///
/// Fields are kept loosely typed so that a malformed entry surfaces as a
/// configuration error at load time instead of failing the whole fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    /// Unique signal identifier.
    pub name: String,

    /// Modbus address (number or numeric string).
    #[serde(alias = "modbus_address")]
    pub address: serde_json::Value,

    /// Signal kind, e.g. `"Holding Register"` or `"coil"`.
    #[serde(alias = "signal_type", alias = "type")]
    pub kind: String,

    /// Optional human label.
    #[serde(default, alias = "signal_name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Optional initial value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl SignalDef {
    /// Build a well-formed definition.
    pub fn new(name: impl Into<String>, address: u16, kind: SignalKind) -> Self {
        Self {
            name: name.into(),
            address: serde_json::Value::from(address),
            kind: kind.as_str().to_string(),
            display_name: None,
            value: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Set the initial value.
    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Parse the kind field.
    pub fn parse_kind(&self) -> Result<SignalKind> {
        self.kind.parse().map_err(|_| {
            Error::InvalidSignal(format!(
                "signal '{}': unknown kind '{}'",
                self.name, self.kind
            ))
        })
    }

    /// Parse the address field into a Modbus offset.
    pub fn parse_address(&self) -> Result<u16> {
        let parsed = match &self.address {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };

        let address = parsed.ok_or_else(|| {
            Error::InvalidSignal(format!(
                "signal '{}': address {} is not a non-negative integer",
                self.name, self.address
            ))
        })?;

        u16::try_from(address).map_err(|_| {
            Error::InvalidSignal(format!(
                "signal '{}': address {} exceeds the Modbus range",
                self.name, address
            ))
        })
    }
}

/// A registered signal with its last observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal identifier.
    pub name: String,

    /// Optional human label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Modbus address.
    pub address: u16,

    /// Signal kind.
    pub kind: SignalKind,

    /// Last observed value (`None` until the first successful read).
    pub value: Option<SignalValue>,

    /// Unix epoch milliseconds of the last value change.
    pub last_update: Option<i64>,
}

impl Signal {
    /// Create a signal with no value yet.
    pub fn new(name: impl Into<String>, address: u16, kind: SignalKind) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            address,
            kind,
            value: None,
            last_update: None,
        }
    }

    /// Validate and convert an external definition.
    pub fn from_def(def: &SignalDef) -> Result<Self> {
        if def.name.trim().is_empty() {
            return Err(Error::InvalidSignal(
                "signal name cannot be empty".to_string(),
            ));
        }

        let kind = def.parse_kind()?;
        let address = def.parse_address()?;
        let value = def
            .value
            .as_ref()
            .map(|raw| SignalValue::coerce(kind, raw))
            .transpose()
            .map_err(|e| {
                Error::InvalidSignal(format!("signal '{}': initial value: {}", def.name, e))
            })?;

        Ok(Self {
            name: def.name.clone(),
            display_name: def.display_name.clone(),
            address,
            kind,
            value,
            last_update: None,
        })
    }

    /// Label for humans: the display name when set, else the name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "Digital Input Contact".parse::<SignalKind>().unwrap(),
            SignalKind::DigitalInputContact
        );
        assert_eq!(
            "digital_output_coil".parse::<SignalKind>().unwrap(),
            SignalKind::DigitalOutputCoil
        );
        assert_eq!(
            "Analog-Input-Register".parse::<SignalKind>().unwrap(),
            SignalKind::AnalogInputRegister
        );
        assert_eq!(
            "holding".parse::<SignalKind>().unwrap(),
            SignalKind::HoldingRegister
        );
        assert!("Analog Output".parse::<SignalKind>().is_err());
    }

    #[test]
    fn test_kind_writability() {
        assert!(SignalKind::DigitalOutputCoil.is_writable());
        assert!(SignalKind::HoldingRegister.is_writable());
        assert!(!SignalKind::DigitalInputContact.is_writable());
        assert!(!SignalKind::AnalogInputRegister.is_writable());
    }

    #[test]
    fn test_coerce_digital() {
        let kind = SignalKind::DigitalOutputCoil;
        assert_eq!(
            SignalValue::coerce(kind, &json!(true)).unwrap(),
            SignalValue::Bool(true)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!(0)).unwrap(),
            SignalValue::Bool(false)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!("on")).unwrap(),
            SignalValue::Bool(true)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!("false")).unwrap(),
            SignalValue::Bool(false)
        );
        assert!(SignalValue::coerce(kind, &json!(null)).is_err());
        assert!(SignalValue::coerce(kind, &json!("maybe")).is_err());
    }

    #[test]
    fn test_coerce_register() {
        let kind = SignalKind::HoldingRegister;
        assert_eq!(
            SignalValue::coerce(kind, &json!(80)).unwrap(),
            SignalValue::Word(80)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!(12.9)).unwrap(),
            SignalValue::Word(12)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!("42")).unwrap(),
            SignalValue::Word(42)
        );
        assert_eq!(
            SignalValue::coerce(kind, &json!(true)).unwrap(),
            SignalValue::Word(1)
        );
        assert!(SignalValue::coerce(kind, &json!(-1)).is_err());
        assert!(SignalValue::coerce(kind, &json!(70000)).is_err());
        assert!(SignalValue::coerce(kind, &json!("hot")).is_err());
    }

    #[test]
    fn test_value_serializes_untagged() {
        assert_eq!(serde_json::to_value(SignalValue::Word(75)).unwrap(), json!(75));
        assert_eq!(
            serde_json::to_value(SignalValue::Bool(true)).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_signal_from_def() {
        let def: SignalDef = serde_json::from_value(json!({
            "name": "CONN-001-SIG-0001",
            "signal_name": "Conveyor running",
            "modbus_address": "12",
            "signal_type": "Digital Output Coil",
            "value": false
        }))
        .unwrap();

        let signal = Signal::from_def(&def).unwrap();
        assert_eq!(signal.address, 12);
        assert_eq!(signal.kind, SignalKind::DigitalOutputCoil);
        assert_eq!(signal.label(), "Conveyor running");
        assert_eq!(signal.value, Some(SignalValue::Bool(false)));
    }

    #[test]
    fn test_signal_from_def_rejects_bad_address() {
        let mut def = SignalDef::new("temp", 10, SignalKind::HoldingRegister);
        def.address = json!("ten");
        assert!(matches!(
            Signal::from_def(&def),
            Err(Error::InvalidSignal(_))
        ));

        def.address = json!(-3);
        assert!(Signal::from_def(&def).is_err());

        def.address = json!(65536);
        assert!(Signal::from_def(&def).is_err());
    }

    #[test]
    fn test_signal_from_def_rejects_bad_kind() {
        let mut def = SignalDef::new("temp", 10, SignalKind::HoldingRegister);
        def.kind = "Analog Output".to_string();
        let err = Signal::from_def(&def).unwrap_err();
        assert!(err.to_string().contains("Analog Output"));
    }
}
