//! EC2 discovery: turns a `DescribeInstances` call into a `Vec<Host>`,
//! for `--awshosts`.
//!
//! Grounded on `original_source/aws.go` (`initAWS`, `getAwsRegionE`,
//! `getEc2Instances`, `newHostFromInstance`), ported from `aws-sdk-go` v1 to
//! `aws-config`+`aws-sdk-ec2`. The rest of this crate is blocking/thread
//! based, with no async runtime anywhere near the SSH transport, so
//! this module is a small, self-contained async island: it spins up a
//! dedicated multi-thread `tokio::Runtime` just long enough to make the one
//! API call, then hands back plain `Host` values to the synchronous caller.

use crate::error::AwsError;
use crate::host::Host;

/// CLI-level region/credential overrides; empty strings defer to the
/// environment exactly as `initAWS` does (`AWS_REGION` / instance metadata,
/// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`).
#[derive(Debug, Clone, Default)]
pub struct AwsOverrides {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Discover running-and-stopped EC2 instances and map each to a [`Host`],
/// applying the same special-tag handling as `newHostFromInstance`.
pub fn discover_hosts(overrides: AwsOverrides) -> Result<Vec<Host>, AwsError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .expect("tokio runtime construction cannot fail with this config");
    runtime.block_on(discover_hosts_async(overrides))
}

async fn discover_hosts_async(overrides: AwsOverrides) -> Result<Vec<Host>, AwsError> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

    if let Some(region) = overrides.region.clone() {
        loader = loader.region(aws_config::Region::new(region));
    } else if let Ok(region) = std::env::var("AWS_REGION") {
        if !region.is_empty() {
            loader = loader.region(aws_config::Region::new(region));
        }
    }

    if let (Some(access_key), Some(secret_key)) = (&overrides.access_key, &overrides.secret_key) {
        loader = loader.credentials_provider(aws_sdk_ec2::config::Credentials::new(
            access_key, secret_key, None, None, "muster-cli-override",
        ));
    }

    let config = loader.load().await;
    if config.region().is_none() {
        return Err(AwsError::MissingRegion);
    }

    let client = aws_sdk_ec2::Client::new(&config);
    let output = client
        .describe_instances()
        .send()
        .await
        .map_err(|e| AwsError::Describe(Box::new(e)))?;

    let hosts = output
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .map(host_from_instance)
        .collect();

    Ok(hosts)
}

/// Map one EC2 instance to a `Host`, handling the special tag keys the
/// source treats as struct fields rather than free-form tags: `Name`,
/// `sshuser`, `sshport`, `wave`, `noall`, `dontupdatepackages`. Every other
/// tag becomes a `key` or `key|value` entry in `tags`.
fn host_from_instance(inst: &aws_sdk_ec2::types::Instance) -> Host {
    let mut host = Host {
        address: inst.private_ip_address().unwrap_or_default().to_string(),
        arch: inst
            .architecture()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default(),
        loc: inst
            .placement()
            .and_then(|p| p.availability_zone())
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };

    if inst.state().and_then(|s| s.name()).map(|n| n.as_str()) != Some("running") {
        host.offline = true;
    }

    let mut tags = Vec::new();
    for tag in inst.tags() {
        let Some(key) = tag.key() else { continue };
        let value = tag.value().unwrap_or_default();
        match key {
            "Name" => host.name = value.to_string(),
            "sshuser" => host.user = Some(value.to_string()),
            "sshport" => host.port = value.parse().unwrap_or(0),
            "wave" => host.wave = value.parse().unwrap_or(0),
            "noall" => host.offline = true,
            "dontupdatepackages" => host.dont_update_packages = Some(value.to_string()),
            _ if value.is_empty() => tags.push(key.to_string()),
            _ => tags.push(format!("{key}|{value}")),
        }
    }
    host.tags = tags;

    host
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::types::{Instance, InstanceState, InstanceStateName, Placement, Tag};

    fn instance_with_tags(tags: Vec<Tag>) -> Instance {
        Instance::builder()
            .private_ip_address("10.0.0.5")
            .architecture(aws_sdk_ec2::types::ArchitectureValues::X8664)
            .placement(Placement::builder().availability_zone("us-east-1a").build())
            .state(InstanceState::builder().name(InstanceStateName::Running).build())
            .set_tags(Some(tags))
            .build()
    }

    fn tag(key: &str, value: &str) -> Tag {
        Tag::builder().key(key).value(value).build()
    }

    #[test]
    fn special_tags_map_to_host_fields() {
        let inst = instance_with_tags(vec![
            tag("Name", "web-1"),
            tag("sshuser", "deploy"),
            tag("sshport", "2222"),
            tag("wave", "3"),
            tag("role", "httpd"),
        ]);
        let host = host_from_instance(&inst);
        assert_eq!(host.name, "web-1");
        assert_eq!(host.user, Some("deploy".to_string()));
        assert_eq!(host.port, 2222);
        assert_eq!(host.wave, 3);
        assert_eq!(host.tags, vec!["role|httpd".to_string()]);
        assert!(!host.offline);
    }

    #[test]
    fn noall_tag_marks_host_offline() {
        let inst = instance_with_tags(vec![tag("Name", "excluded"), tag("noall", "true")]);
        let host = host_from_instance(&inst);
        assert!(host.offline);
    }

    #[test]
    fn non_running_instance_is_offline() {
        let inst = Instance::builder()
            .private_ip_address("10.0.0.6")
            .state(InstanceState::builder().name(InstanceStateName::Stopped).build())
            .build();
        let host = host_from_instance(&inst);
        assert!(host.offline);
    }

    #[test]
    fn valueless_tags_become_bare_tag_names() {
        let inst = instance_with_tags(vec![tag("Name", "h1"), Tag::builder().key("spot").build()]);
        let host = host_from_instance(&inst);
        assert_eq!(host.tags, vec!["spot".to_string()]);
    }
}
