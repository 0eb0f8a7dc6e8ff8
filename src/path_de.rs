use serde::de::DeserializeOwned;

/// A deserialization failure together with the JSON path where it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at JSON path {} → {}", self.path, self.message)
    }
}

impl std::error::Error for PathError {}

fn split<E: std::fmt::Display>(err: serde_path_to_error::Error<E>) -> PathError {
    PathError {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}

/// Deserialize a typed view out of an already-parsed tree.
pub fn from_value_with_path<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, PathError> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(split)
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, PathError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(split)
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PathError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(split)
}

pub fn from_yaml_with_path<T: DeserializeOwned>(src: &str) -> Result<T, PathError> {
    let de = serde_yaml::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Outer {
        inner: Vec<Inner>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Inner {
        count: u32,
    }

    #[test]
    fn error_carries_the_failing_path() {
        let err = from_str_with_path::<Outer>(r#"{"inner": [{"count": 1}, {"count": "x"}]}"#)
            .unwrap_err();
        assert_eq!(err.path, "inner[1].count");
        assert!(err.to_string().starts_with("at JSON path inner[1].count"));
    }

    #[test]
    fn value_and_yaml_inputs_share_the_path_format() {
        let value = serde_json::json!({"inner": [{"count": -1}]});
        let err = from_value_with_path::<Outer>(&value).unwrap_err();
        assert_eq!(err.path, "inner[0].count");

        let err = from_yaml_with_path::<Outer>("inner:\n  - count: nope\n").unwrap_err();
        assert_eq!(err.path, "inner[0].count");
    }
}
