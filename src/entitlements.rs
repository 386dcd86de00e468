use std::collections::BTreeMap;
use std::time::SystemTime;

/// A decoded entitlement value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntitlementValue {
    Bool(bool),
    String(String),
    Integer(i128),
    Real(f64),
    Array(Vec<EntitlementValue>),
    Dictionary(BTreeMap<String, EntitlementValue>),
    Data(Vec<u8>),
    Date(SystemTime),
    Unknown,
}

impl EntitlementValue {
    pub fn kind(&self) -> &'static str {
        match self {
            EntitlementValue::Bool(_) => "bool",
            EntitlementValue::String(_) => "string",
            EntitlementValue::Integer(_) => "integer",
            EntitlementValue::Real(_) => "real",
            EntitlementValue::Array(_) => "array",
            EntitlementValue::Dictionary(_) => "dict",
            EntitlementValue::Data(_) => "data",
            EntitlementValue::Date(_) => "date",
            EntitlementValue::Unknown => "unknown",
        }
    }
}

impl From<plist::Value> for EntitlementValue {
    fn from(value: plist::Value) -> Self {
        match value {
            plist::Value::Boolean(b) => EntitlementValue::Bool(b),
            plist::Value::String(s) => EntitlementValue::String(s),
            plist::Value::Integer(i) => match (i.as_signed(), i.as_unsigned()) {
                (Some(v), _) => EntitlementValue::Integer(v.into()),
                (None, Some(v)) => EntitlementValue::Integer(v.into()),
                (None, None) => EntitlementValue::Unknown,
            },
            plist::Value::Real(r) => EntitlementValue::Real(r),
            plist::Value::Array(items) => {
                EntitlementValue::Array(items.into_iter().map(Into::into).collect())
            }
            plist::Value::Dictionary(dict) => EntitlementValue::Dictionary(
                dict.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
            plist::Value::Data(bytes) => EntitlementValue::Data(bytes),
            plist::Value::Date(date) => EntitlementValue::Date(date.into()),
            _ => EntitlementValue::Unknown,
        }
    }
}

pub type Entitlements = BTreeMap<String, EntitlementValue>;

/// Decodes raw entitlement text. The top level must be a dictionary.
pub fn decode_entitlements(text: &str) -> Result<Entitlements, crate::error::BoxError> {
    let value = plist::Value::from_reader_xml(text.as_bytes())?;
    match EntitlementValue::from(value) {
        EntitlementValue::Dictionary(map) => Ok(map),
        other => Err(format!("top-level {} is not a dictionary", other.kind()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>application-identifier</key>
	<string>com.apple.springboard</string>
	<key>com.apple.private.security.no-sandbox</key>
	<true/>
	<key>com.apple.private.allow-explicit-graphics-priority</key>
	<false/>
	<key>com.apple.security.exception.mach-lookup.global-name</key>
	<array>
		<string>com.apple.backboard.hid.services</string>
	</array>
	<key>seatbelt-profiles</key>
	<dict>
		<key>default</key>
		<string>SpringBoard</string>
	</dict>
	<key>com.apple.developer.memory-limit</key>
	<integer>4096</integer>
</dict>
</plist>
"#;

    #[test]
    fn decodes_every_kind() -> anyhow::Result<()> {
        let ents = decode_entitlements(SAMPLE).map_err(|e| anyhow::anyhow!(e))?;

        assert_eq!(
            ents["application-identifier"],
            EntitlementValue::String("com.apple.springboard".to_string())
        );
        assert_eq!(ents["com.apple.private.security.no-sandbox"], EntitlementValue::Bool(true));
        assert_eq!(
            ents["com.apple.private.allow-explicit-graphics-priority"],
            EntitlementValue::Bool(false)
        );
        assert_eq!(
            ents["com.apple.security.exception.mach-lookup.global-name"].kind(),
            "array"
        );
        assert_eq!(ents["seatbelt-profiles"].kind(), "dict");
        assert_eq!(ents["com.apple.developer.memory-limit"], EntitlementValue::Integer(4096));
        Ok(())
    }

    #[test]
    fn malformed_text_fails() {
        assert!(decode_entitlements("<plist><dict><key>x</key>").is_err());
    }

    #[test]
    fn non_dictionary_root_fails() {
        let err = decode_entitlements(
            r#"<?xml version="1.0" encoding="UTF-8"?><plist version="1.0"><array/></plist>"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a dictionary"));
    }
}
