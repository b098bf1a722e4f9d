//! Option bags accepted by `openRepo` and `openFile`.
//!
//! Every field is optional: `None` means "use the engine default". Keys the
//! bag does not recognize are ignored, while a recognized key carrying the
//! wrong kind of value is rejected.

use crate::error::TypeError;
use crate::value::Value;

fn opt_bool(bag: &Value, key: &str) -> Result<Option<bool>, TypeError> {
    match bag.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(TypeError::InvalidOption {
            key: key.to_string(),
            reason: format!("expected boolean, got {}", other.kind()),
        }),
    }
}

fn opt_version_limit(bag: &Value) -> Result<Option<u8>, TypeError> {
    match bag.get("versionLimit") {
        None => Ok(None),
        Some(Value::Number(n)) if (1..=255).contains(n) => Ok(Some(*n as u8)),
        Some(other) => Err(TypeError::InvalidOption {
            key: "versionLimit".into(),
            reason: format!("expected number in 1..=255, got {other:?}"),
        }),
    }
}

fn require_bag(bag: &Value) -> Result<(), TypeError> {
    match bag {
        Value::Undefined | Value::Null | Value::Object(_) => Ok(()),
        other => Err(TypeError::UnexpectedKind {
            expected: "object",
            actual: other.kind().as_str(),
        }),
    }
}

fn push(entries: &mut Vec<(&'static str, Value)>, key: &'static str, v: Option<impl Into<Value>>) {
    if let Some(v) = v {
        entries.push((key, v.into()));
    }
}

/// Options for opening a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoOptions {
    pub create: Option<bool>,
    pub create_new: Option<bool>,
    pub compress: Option<bool>,
    pub version_limit: Option<u8>,
    pub dedup_chunk: Option<bool>,
    pub read_only: Option<bool>,
}

impl RepoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, v: bool) -> Self {
        self.create = Some(v);
        self
    }

    pub fn create_new(mut self, v: bool) -> Self {
        self.create_new = Some(v);
        self
    }

    pub fn compress(mut self, v: bool) -> Self {
        self.compress = Some(v);
        self
    }

    pub fn version_limit(mut self, v: u8) -> Self {
        self.version_limit = Some(v);
        self
    }

    pub fn dedup_chunk(mut self, v: bool) -> Self {
        self.dedup_chunk = Some(v);
        self
    }

    pub fn read_only(mut self, v: bool) -> Self {
        self.read_only = Some(v);
        self
    }

    pub fn from_value(bag: &Value) -> Result<Self, TypeError> {
        require_bag(bag)?;
        Ok(Self {
            create: opt_bool(bag, "create")?,
            create_new: opt_bool(bag, "createNew")?,
            compress: opt_bool(bag, "compress")?,
            version_limit: opt_version_limit(bag)?,
            dedup_chunk: opt_bool(bag, "dedupChunk")?,
            read_only: opt_bool(bag, "readOnly")?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut entries = Vec::new();
        push(&mut entries, "create", self.create);
        push(&mut entries, "createNew", self.create_new);
        push(&mut entries, "compress", self.compress);
        push(&mut entries, "versionLimit", self.version_limit.map(u32::from));
        push(&mut entries, "dedupChunk", self.dedup_chunk);
        push(&mut entries, "readOnly", self.read_only);
        Value::object(entries)
    }
}

/// Options for opening a file inside a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileOptions {
    pub read: Option<bool>,
    pub write: Option<bool>,
    pub append: Option<bool>,
    pub truncate: Option<bool>,
    pub create: Option<bool>,
    pub create_new: Option<bool>,
    pub version_limit: Option<u8>,
    pub dedup_chunk: Option<bool>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, v: bool) -> Self {
        self.read = Some(v);
        self
    }

    pub fn write(mut self, v: bool) -> Self {
        self.write = Some(v);
        self
    }

    pub fn append(mut self, v: bool) -> Self {
        self.append = Some(v);
        self
    }

    pub fn truncate(mut self, v: bool) -> Self {
        self.truncate = Some(v);
        self
    }

    pub fn create(mut self, v: bool) -> Self {
        self.create = Some(v);
        self
    }

    pub fn create_new(mut self, v: bool) -> Self {
        self.create_new = Some(v);
        self
    }

    pub fn version_limit(mut self, v: u8) -> Self {
        self.version_limit = Some(v);
        self
    }

    pub fn dedup_chunk(mut self, v: bool) -> Self {
        self.dedup_chunk = Some(v);
        self
    }

    pub fn from_value(bag: &Value) -> Result<Self, TypeError> {
        require_bag(bag)?;
        Ok(Self {
            read: opt_bool(bag, "read")?,
            write: opt_bool(bag, "write")?,
            append: opt_bool(bag, "append")?,
            truncate: opt_bool(bag, "truncate")?,
            create: opt_bool(bag, "create")?,
            create_new: opt_bool(bag, "createNew")?,
            version_limit: opt_version_limit(bag)?,
            dedup_chunk: opt_bool(bag, "dedupChunk")?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut entries = Vec::new();
        push(&mut entries, "read", self.read);
        push(&mut entries, "write", self.write);
        push(&mut entries, "append", self.append);
        push(&mut entries, "truncate", self.truncate);
        push(&mut entries, "create", self.create);
        push(&mut entries, "createNew", self.create_new);
        push(&mut entries, "versionLimit", self.version_limit.map(u32::from));
        push(&mut entries, "dedupChunk", self.dedup_chunk);
        Value::object(entries)
    }

    /// Whether these options grant write access.
    pub fn wants_write(&self) -> bool {
        [self.write, self.append, self.truncate, self.create, self.create_new]
            .into_iter()
            .any(|v| v == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bag_is_all_defaults() {
        assert_eq!(RepoOptions::from_value(&Value::Undefined).unwrap(), RepoOptions::default());
        assert_eq!(FileOptions::from_value(&Value::object(Vec::<(String, Value)>::new())).unwrap(), FileOptions::default());
    }

    #[test]
    fn repo_keys_recognized() {
        let bag = Value::object([
            ("create", Value::Bool(true)),
            ("versionLimit", Value::Number(3)),
            ("readOnly", Value::Bool(false)),
            ("unknownKey", Value::from("ignored")),
        ]);
        let opts = RepoOptions::from_value(&bag).unwrap();
        assert_eq!(opts, RepoOptions::new().create(true).version_limit(3).read_only(false));
    }

    #[test]
    fn wrong_kind_rejected() {
        let bag = Value::object([("create", Value::from("yes"))]);
        let err = RepoOptions::from_value(&bag).unwrap_err();
        assert!(matches!(err, TypeError::InvalidOption { ref key, .. } if key == "create"));

        let bag = Value::object([("versionLimit", Value::Number(0))]);
        assert!(FileOptions::from_value(&bag).is_err());
        let bag = Value::object([("versionLimit", Value::Number(256))]);
        assert!(FileOptions::from_value(&bag).is_err());

        assert!(FileOptions::from_value(&Value::from("x")).is_err());
    }

    #[test]
    fn to_value_round_trips_set_keys_only() {
        let opts = FileOptions::new().write(true).create_new(true);
        let bag = opts.to_value();
        assert_eq!(bag.as_object().unwrap().len(), 2);
        assert_eq!(FileOptions::from_value(&bag).unwrap(), opts);
    }

    #[test]
    fn write_access_implied() {
        assert!(!FileOptions::new().read(true).wants_write());
        assert!(FileOptions::new().append(true).wants_write());
        assert!(FileOptions::new().create(true).wants_write());
        assert!(!FileOptions::new().write(false).wants_write());
    }
}
