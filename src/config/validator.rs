use crate::config::Config;
use crate::error::{RagbusError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_broker(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_indexer(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagbusError::ConfigValidation { errors })
        }
    }

    fn validate_broker(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.broker.amqp_url.starts_with("amqp://")
            && !config.broker.amqp_url.starts_with("amqps://")
        {
            errors.push(ValidationError::new(
                "broker.amqp_url",
                format!("Not an AMQP URL: {}", config.broker.amqp_url),
            ));
        }

        if config.broker.exchange.is_empty() {
            errors.push(ValidationError::new(
                "broker.exchange",
                "Exchange name cannot be empty",
            ));
        }

        for (path, key) in [
            ("broker.search_routing_key", &config.broker.search_routing_key),
            (
                "broker.recommend_routing_key",
                &config.broker.recommend_routing_key,
            ),
            ("broker.quiz_routing_key", &config.broker.quiz_routing_key),
        ] {
            if key.is_empty() {
                errors.push(ValidationError::new(path, "Routing key cannot be empty"));
            }
        }

        if config.broker.prefetch == 0 {
            errors.push(ValidationError::new(
                "broker.prefetch",
                "Prefetch must be greater than 0",
            ));
        }

        if config.broker.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "broker.rpc_timeout_secs",
                "RPC timeout must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.index.url.starts_with("http://") && !config.index.url.starts_with("https://") {
            errors.push(ValidationError::new(
                "index.url",
                format!("Not an HTTP URL: {}", config.index.url),
            ));
        }

        if config.index.collection.is_empty() {
            errors.push(ValidationError::new(
                "index.collection",
                "Collection name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Embedding model cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.llm.url.starts_with("http://") && !config.llm.url.starts_with("https://") {
            errors.push(ValidationError::new(
                "llm.url",
                format!("Not an HTTP URL: {}", config.llm.url),
            ));
        }

        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new(
                "llm.max_tokens",
                "Max tokens must be greater than 0",
            ));
        }

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature out of range [0, 2]: {}", config.llm.temperature),
            ));
        }

        if !(0.0..=1.0).contains(&config.llm.top_p) {
            errors.push(ValidationError::new(
                "llm.top_p",
                format!("top_p out of range [0, 1]: {}", config.llm.top_p),
            ));
        }
    }

    fn validate_indexer(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexer.chunk_size == 0 {
            errors.push(ValidationError::new(
                "indexer.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.indexer.chunk_overlap >= config.indexer.chunk_size {
            errors.push(ValidationError::new(
                "indexer.chunk_overlap",
                format!(
                    "Chunk overlap ({}) must be smaller than chunk size ({})",
                    config.indexer.chunk_overlap, config.indexer.chunk_size
                ),
            ));
        }

        if config.indexer.upsert_batch_size == 0 {
            errors.push(ValidationError::new(
                "indexer.upsert_batch_size",
                "Upsert batch size must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_amqp_url_is_rejected() {
        let mut config = Config::default();
        config.broker.amqp_url = "http://localhost:5672".to_string();
        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            RagbusError::ConfigValidation { errors } => {
                assert!(errors.iter().any(|e| e.path == "broker.amqp_url"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.indexer.chunk_overlap = config.indexer.chunk_size;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn multiple_errors_are_collected() {
        let mut config = Config::default();
        config.broker.exchange.clear();
        config.broker.prefetch = 0;
        config.llm.temperature = 5.0;
        match ConfigValidator::validate(&config).unwrap_err() {
            RagbusError::ConfigValidation { errors } => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_api_key_is_allowed() {
        let mut config = Config::default();
        config.broker.api_key.clear();
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
