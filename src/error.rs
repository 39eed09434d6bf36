//! Centralized error types, one enum per subsystem, rather than a single
//! kitchen-sink error.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading config directory '{0}': {1}")]
    Directory(PathBuf, std::io::Error),

    #[error("error reading config file '{0}': {1}")]
    Io(PathBuf, std::io::Error),

    #[error("error parsing JSON in config file '{0}': {1}")]
    Json(PathBuf, serde_json::Error),

    #[error("workflow '{0}' does not exist in the loaded configuration")]
    UnknownWorkflow(String),

    #[error("workflow '{0}' requires variable '{1}' which is not set")]
    MissingVar(String, String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, humantime::DurationError),

    #[error("invalid output format '{0}', expected text, json or xml")]
    InvalidFormat(String),

    #[error("either --cmd or --workflow must be given, not both or neither")]
    CommandOrWorkflow,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("command must not be empty")]
    EmptyCommand,

    #[error("dial of {0} failed: {1}")]
    Dial(String, std::io::Error),

    #[error("ssh handshake with {0} failed: {1}")]
    Handshake(String, ssh2::Error),

    #[error("authentication to {0} failed: {1}")]
    Auth(String, ssh2::Error),

    #[error("could not open ssh session channel: {0}")]
    Channel(ssh2::Error),

    #[error("request for pseudo terminal failed: {0}")]
    Pty(ssh2::Error),

    #[error("execution of command failed: {0}")]
    Exec(ssh2::Error),

    #[error("remote command exited with status {0}")]
    NonZeroExit(i32),

    #[error("file transfer (scp) is not implemented")]
    ScpUnimplemented,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("SET requires a variable name and a value: '{0}'")]
    MalformedSet(String),

    #[error("FOR requires a list and an action: '{0}'")]
    MalformedFor(String),

    #[error("needs-restarting probe failed: {0}")]
    NeedsRestartingTransport(#[from] ExecutorError),

    #[error("S3(...) generator error: {0}")]
    S3(#[from] S3Error),

    #[error("unknown filter field or operator in '{0}'")]
    BadFilter(String),
}

#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    #[error("S3(...) requires 'awsaccess_key' and 'awsaccess_secretkey' to be set")]
    MissingCredentials,

    #[error("could not parse S3 URL '{0}'")]
    BadUrl(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("deadline of {0:?} elapsed with {1} host(s) still outstanding")]
    Deadline(std::time::Duration, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("could not determine AWS region: set --awsregions or AWS_REGION")]
    MissingRegion,

    #[error("EC2 DescribeInstances failed: {0}")]
    Describe(#[from] Box<aws_sdk_ec2::error::SdkError<aws_sdk_ec2::operation::describe_instances::DescribeInstancesError>>),
}

#[derive(Debug, thiserror::Error)]
pub enum MusterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error("timed out waiting for {0} host(s) to respond")]
    TimedOut(usize),
}
