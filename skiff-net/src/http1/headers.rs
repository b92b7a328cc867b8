use super::types::ParseError;

const HOP_TOKEN_SEPARATORS: &str = "()<>@,;:\\\"/[]?={} \t";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderStore {
    entries: Vec<Header>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn insert_raw_line(&mut self, line: &str) -> Result<(), ParseError> {
        let colon = line.find(':').ok_or(ParseError::MissingSeparator)?;
        let name = line[..colon].trim_end();
        let value = line[colon..].trim_start_matches([':', ' ', '\t']);
        self.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove_all(&mut self, name: &str) {
        self.entries
            .retain(|entry| !entry.name.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn strip_hop_headers(&mut self) {
        for name in ["connection", "proxy-connection"] {
            let listed: Vec<String> = self
                .entries
                .iter()
                .filter(|entry| entry.name.eq_ignore_ascii_case(name))
                .flat_map(|entry| {
                    entry
                        .value
                        .split(|separator: char| HOP_TOKEN_SEPARATORS.contains(separator))
                        .filter(|token| !token.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();

            for token in listed {
                self.remove_all(&token);
            }
            self.remove_all(name);
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }
}
