//! AWS SDK configuration shared by the SQS queues and the DynamoDB store.

use crate::config::AwsConfig;
use crate::error::BackendError;
use aws_config::retry::RetryConfig;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, ConfigLoader, Region, SdkConfig};
use aws_sdk_sqs::config::Credentials;
use tracing::info;

const SESSION_NAME: &str = "alert-host";

fn base_loader(config: &AwsConfig) -> ConfigLoader {
    let retry = RetryConfig::standard()
        .with_max_attempts(config.max_retry_attempts.max(1))
        .with_max_backoff(config.max_retry_backoff_delay);

    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .retry_config(retry)
}

/// Build the SDK config: region, optional static keys, optional assumed role.
pub async fn load_sdk_config(config: &AwsConfig) -> Result<SdkConfig, BackendError> {
    if config.region.trim().is_empty() {
        return Err(BackendError::MissingParameter {
            backend: "aws",
            parameter: "AWS_REGION",
        });
    }

    let mut loader = base_loader(config);
    let static_keys = !config.access_key_id.is_empty() && !config.secret_access_key.is_empty();
    if static_keys {
        let session_token = Some(config.session_token.clone()).filter(|t| !t.is_empty());
        loader = loader.credentials_provider(Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            session_token,
            None,
            "alert-host-static",
        ));
    }

    let sdk_config = loader.load().await;

    if config.assume_role.is_empty() {
        info!(region = %config.region, static_keys, "AWS configuration loaded");
        return Ok(sdk_config);
    }

    let role = AssumeRoleProvider::builder(config.assume_role.clone())
        .session_name(SESSION_NAME)
        .configure(&sdk_config)
        .build()
        .await;

    info!(region = %config.region, role = %config.assume_role, "AWS configuration loaded with assumed role");
    Ok(base_loader(config).credentials_provider(role).load().await)
}

pub fn sqs_client(sdk_config: &SdkConfig, config: &AwsConfig) -> aws_sdk_sqs::Client {
    let mut builder = aws_sdk_sqs::config::Builder::from(sdk_config);
    if !config.sqs_endpoint.is_empty() {
        builder = builder.endpoint_url(&config.sqs_endpoint);
    }
    aws_sdk_sqs::Client::from_conf(builder.build())
}

pub fn dynamodb_client(sdk_config: &SdkConfig) -> aws_sdk_dynamodb::Client {
    aws_sdk_dynamodb::Client::new(sdk_config)
}
