/// Ordered header multimap.
///
/// Lookups are case-insensitive. Each distinct name keeps the spelling of its
/// first occurrence, names are iterated in first-arrival order and repeated
/// names accumulate values in arrival order instead of overwriting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    /// Lower-cased lookup key
    key: String,
    /// Name as it first arrived
    name: String,
    values: Vec<String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `name`, keeping any values already present.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let value = value.into();

        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.values.push(value),
            None => self.entries.push(HeaderEntry {
                key,
                name,
                values: vec![value],
            }),
        }
    }

    /// Replaces every value stored under `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.key.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).values)
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name)
            .and_then(|e| e.values.first())
            .map(String::as_str)
    }

    /// Every value stored under `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.find(name).map(|e| e.values.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct names with their values, original spelling, arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    /// One `(name, value)` pair per stored value, suitable for serialization.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|e| e.values.iter().map(move |v| (e.name.as_str(), v.as_str())))
    }

    fn find(&self, name: &str) -> Option<&HeaderEntry> {
        self.entries.iter().find(|e| e.key.eq_ignore_ascii_case(name))
    }
}
