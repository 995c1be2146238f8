/// Errors produced while splitting a request into command and fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty request")]
    EmptyRequest,
    #[error("malformed message: no command token")]
    MalformedMessage,
}

/// A request split on `|`: the upper-cased command token followed by its
/// `key=value` segments in wire order.
///
/// Keys and values are trimmed. Segments without `=` or with an empty key
/// are dropped. Values are taken verbatim, so a value cannot itself contain
/// `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    command: String,
    fields: Vec<(String, String)>,
}

impl Parse {
    pub fn new(text: &str) -> Result<Parse, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::EmptyRequest);
        }

        let mut segments = text.split('|');

        let command = segments.next().unwrap_or_default().trim().to_uppercase();
        if command.is_empty() {
            return Err(ParseError::MalformedMessage);
        }

        let fields = segments
            .filter_map(|segment| {
                let (key, value) = segment.split_once('=')?;
                let key = key.trim();

                if key.is_empty() {
                    return None;
                }

                Some((key.to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Parse { command, fields })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Removes every segment named `key` and returns the last value seen.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let mut found = None;

        self.fields.retain(|(k, v)| {
            if k == key {
                found = Some(v.clone());
                false
            } else {
                true
            }
        });

        found
    }

    /// Like [`Parse::take`], with absent fields read as empty strings.
    pub fn take_or_empty(&mut self, key: &str) -> String {
        self.take(key).unwrap_or_default()
    }

    pub fn into_fields(self) -> Vec<(String, String)> {
        self.fields
    }
}

/// Builds `COMMAND|key=value|...`, skipping blank values.
pub fn encode(command: &str, fields: &[(&str, &str)]) -> String {
    let mut out = command.to_string();

    for (key, value) in fields {
        if value.trim().is_empty() {
            continue;
        }
        out.push('|');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_command_and_fields() {
        let mut parse =
            Parse::new(" create_patient |full_name= Ana Ruiz |document_id=123").unwrap();

        assert_eq!(parse.command(), "CREATE_PATIENT");
        assert_eq!(parse.take("full_name").as_deref(), Some("Ana Ruiz"));
        assert_eq!(parse.take_or_empty("document_id"), "123");
        assert_eq!(parse.take("age"), None);
    }

    #[test]
    fn empty_and_blank_requests() {
        assert_eq!(Parse::new(""), Err(ParseError::EmptyRequest));
        assert_eq!(Parse::new("   \t"), Err(ParseError::EmptyRequest));
    }

    #[test]
    fn missing_command_token_is_malformed() {
        assert_eq!(Parse::new("|patient_id=P-1"), Err(ParseError::MalformedMessage));
        assert_eq!(Parse::new("  |"), Err(ParseError::MalformedMessage));
    }

    #[test]
    fn drops_segments_without_key() {
        let parse = Parse::new("GET_PATIENT|junk|=orphan|patient_id=P-7|note=a=b").unwrap();

        assert_eq!(
            parse.into_fields(),
            vec![
                ("patient_id".to_string(), "P-7".to_string()),
                ("note".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let mut parse = Parse::new("UPDATE_PATIENT|age=30|age=31").unwrap();

        assert_eq!(parse.take("age").as_deref(), Some("31"));
        assert!(parse.into_fields().is_empty());
    }

    #[test]
    fn encode_skips_blank_values() {
        let text = encode("UPDATE_PATIENT", &[("patient_id", "P-1"), ("age", ""), ("sex", "F")]);

        assert_eq!(text, "UPDATE_PATIENT|patient_id=P-1|sex=F");
    }
}
