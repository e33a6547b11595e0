#[cfg(test)]
mod tests {
    use crate::{Config, ResolvedConnection, API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL};
    use std::fs;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_carry_vendor_values() {
        let config = Config::default();

        assert_eq!(config.connection.base_url, DEFAULT_BASE_URL);
        assert!(config.chat.enabled);
        assert_eq!(config.chat.options.model.as_deref(), Some(DEFAULT_CHAT_MODEL));
        assert_eq!(config.chat.options.max_tokens, Some(1024));
        assert_eq!(config.chat.options.temperature, Some(0.95));
        assert_eq!(config.chat.options.top_p, Some(0.7));
        assert_eq!(config.image.options.model.as_deref(), Some("cogview-3"));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("tiangong.toml");

        fs::write(
            &config_path,
            r#"
[connection]
base_url = "https://example.test"
api_key = "file-key"

[chat.options]
model = "SkyChat-MegaVerse"
temperature = 0.3

[image]
enabled = false

[retry]
max_attempts = 5
"#,
        )
        .unwrap();

        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();

        assert_eq!(config.connection.base_url, "https://example.test");
        assert_eq!(config.chat.options.temperature, Some(0.3));
        // Sections present in the file still default their missing fields.
        assert_eq!(config.chat.options.max_tokens, Some(1024));
        assert!(!config.image.enabled);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);

        assert_eq!(
            config.chat_connection().unwrap(),
            ResolvedConnection {
                base_url: "https://example.test".to_string(),
                api_key: "file-key".to_string(),
            }
        );
        assert!(config.image_connection().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");

        let err = Config::load(Some(missing.to_str().unwrap())).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_section_overrides_connection() {
        let config = Config::parse(
            r#"
[connection]
api_key = "shared"

[image]
base_url = "https://images.example.test"
api_key = "image-only"
"#,
        )
        .unwrap();

        let chat = config.chat_connection().unwrap();
        assert_eq!(chat.base_url, DEFAULT_BASE_URL);
        assert_eq!(chat.api_key, "shared");

        let image = config.image_connection().unwrap();
        assert_eq!(image.base_url, "https://images.example.test");
        assert_eq!(image.api_key, "image-only");
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let mut config = Config::default();
        config.apply_env_overrides(no_env);

        let err = config.chat_connection().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_env_key_fills_empty_connection_key() {
        let mut config = Config::parse("[connection]\napi_key = \"\"\n").unwrap();
        config.apply_env_overrides(|key| (key == API_KEY_ENV).then(|| "env-key".to_string()));

        assert_eq!(config.chat_connection().unwrap().api_key, "env-key");
    }

    #[test]
    fn test_env_key_does_not_replace_file_key() {
        let mut config = Config::parse("[connection]\napi_key = \"file-key\"\n").unwrap();
        config.apply_env_overrides(|_| Some("env-key".to_string()));

        assert_eq!(config.connection.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let config = Config::parse("[connection]\nbase_url = \"api.example\"\napi_key = \"k\"\n").unwrap();
        assert!(config.chat_connection().is_err());
    }

    #[test]
    fn test_validation_errors() {
        let config = Config::parse("[retry]\nmax_attempts = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("[chat.options]\ntop_p = 1.5\n").unwrap();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.connection.api_key = Some("saved-key".to_string());
        config.chat.options.temperature = Some(0.5);
        config.save(config_path.to_str().unwrap()).unwrap();

        let reloaded = Config::parse(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }
}
