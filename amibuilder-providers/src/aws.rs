use crate::{inventory, CloudProvider, ProviderError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::types::{
    DiskImageFormat, ExportTaskS3LocationRequest, Filter, IamInstanceProfileSpecification,
    InstanceType, Tag,
};
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_sqs::types::MessageAttributeValue;
use std::collections::HashMap;

const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchEntity",
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "InvalidInstanceID.NotFound",
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidExportImageTaskId.NotFound",
    "ReceiptHandleIsInvalid",
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "QueueAlreadyExists",
];

/// Turn an SDK error into `anyhow`, mapping well-known codes to `ProviderError`.
fn classify<E>(err: E, kind: &'static str, id: &str) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some(code) if NOT_FOUND_CODES.contains(&code) => ProviderError::not_found(kind, id),
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => {
            ProviderError::already_exists(kind, id)
        }
        _ => anyhow::anyhow!("{} '{}': {}", kind, id, DisplayErrorContext(&err)),
    }
}

pub struct AwsProvider {
    ec2: aws_sdk_ec2::Client,
    iam: aws_sdk_iam::Client,
    sqs: aws_sdk_sqs::Client,
    s3: aws_sdk_s3::Client,
    sts: aws_sdk_sts::Client,
    region: String,
}

impl AwsProvider {
    /// Load credentials and region from the environment / shared config files.
    pub async fn from_env(region_override: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region_override.map(str::trim).filter(|r| !r.is_empty()) {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| anyhow::anyhow!("no AWS region configured (set AWS_REGION)"))?;

        Ok(Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            sqs: aws_sdk_sqs::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            sts: aws_sdk_sts::Client::new(&config),
            region,
        })
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn region(&self) -> String {
        self.region.clone()
    }

    async fn caller_account_id(&self) -> Result<String> {
        let out = self
            .sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| classify(e, "caller identity", "self"))?;
        out.account()
            .map(|a| a.to_string())
            .ok_or_else(|| anyhow::anyhow!("caller identity has no account id"))
    }

    async fn caller_user_name(&self) -> Result<String> {
        let out = self
            .iam
            .get_user()
            .send()
            .await
            .map_err(|e| classify(e, "user", "self"))?;
        out.user()
            .map(|u| u.user_name().to_string())
            .ok_or_else(|| anyhow::anyhow!("GetUser returned no user"))
    }

    async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<String> {
        let out = self
            .iam
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await
            .map_err(|e| classify(e, "role", role_name))?;
        Ok(out
            .role()
            .map(|r| r.role_name().to_string())
            .unwrap_or_else(|| role_name.to_string()))
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()> {
        self.iam
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(policy_document)
            .send()
            .await
            .map_err(|e| classify(e, "role", role_name))?;
        Ok(())
    }

    async fn list_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let out = self
                .iam
                .list_role_policies()
                .role_name(role_name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify(e, "role", role_name))?;
            names.extend(out.policy_names().iter().cloned());
            match out.marker() {
                Some(m) if out.is_truncated() => marker = Some(m.to_string()),
                _ => break,
            }
        }
        Ok(names)
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        self.iam
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(|e| classify(e, "role policy", policy_name))?;
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        self.iam
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify(e, "role", role_name))?;
        Ok(())
    }

    async fn create_instance_profile(&self, profile_name: &str) -> Result<()> {
        self.iam
            .create_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .map_err(|e| classify(e, "instance profile", profile_name))?;
        Ok(())
    }

    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()> {
        self.iam
            .add_role_to_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify(e, "instance profile", profile_name))?;
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()> {
        self.iam
            .remove_role_from_instance_profile()
            .instance_profile_name(profile_name)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| classify(e, "instance profile", profile_name))?;
        Ok(())
    }

    async fn instance_profile_exists(&self, profile_name: &str) -> Result<bool> {
        match self
            .iam
            .get_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some("NoSuchEntity") => Ok(false),
            Err(e) => Err(classify(e, "instance profile", profile_name)),
        }
    }

    async fn instance_profile_roles(&self, profile_name: &str) -> Result<Vec<String>> {
        let out = self
            .iam
            .get_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .map_err(|e| classify(e, "instance profile", profile_name))?;
        Ok(out
            .instance_profile()
            .map(|p| p.roles().iter().map(|r| r.role_name().to_string()).collect())
            .unwrap_or_default())
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()> {
        self.iam
            .delete_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .map_err(|e| classify(e, "instance profile", profile_name))?;
        Ok(())
    }

    async fn put_user_policy(
        &self,
        user_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()> {
        self.iam
            .put_user_policy()
            .user_name(user_name)
            .policy_name(policy_name)
            .policy_document(policy_document)
            .send()
            .await
            .map_err(|e| classify(e, "user", user_name))?;
        Ok(())
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String> {
        let out = self
            .sqs
            .create_queue()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| classify(e, "queue", queue_name))?;
        out.queue_url()
            .map(|u| u.to_string())
            .ok_or_else(|| anyhow::anyhow!("CreateQueue returned no URL for {}", queue_name))
    }

    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>> {
        match self.sqs.get_queue_url().queue_name(queue_name).send().await {
            Ok(out) => Ok(out.queue_url().map(|u| u.to_string())),
            Err(e) => {
                let err = classify(e, "queue", queue_name);
                if crate::is_not_found(&err) {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<()> {
        self.sqs
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| classify(e, "queue", queue_url))?;
        Ok(())
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let mut req = self.sqs.send_message().queue_url(queue_url).message_body(body);
        for (name, value) in attributes {
            let attr = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .with_context(|| format!("message attribute {}", name))?;
            req = req.message_attributes(name, attr);
        }
        let out = req
            .send()
            .await
            .map_err(|e| classify(e, "queue", queue_url))?;
        Ok(out.message_id().unwrap_or_default().to_string())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        wait_seconds: i32,
        max_messages: i32,
    ) -> Result<Vec<inventory::QueueMessage>> {
        let out = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .wait_time_seconds(wait_seconds)
            .max_number_of_messages(max_messages)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| classify(e, "queue", queue_url))?;

        Ok(out
            .messages()
            .iter()
            .map(|m| inventory::QueueMessage {
                message_id: m.message_id().unwrap_or_default().to_string(),
                body: m.body().unwrap_or_default().to_string(),
                receipt_handle: m.receipt_handle().map(|r| r.to_string()),
                attributes: m
                    .message_attributes()
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|(k, v)| {
                                v.string_value().map(|s| (k.clone(), s.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| classify(e, "message", receipt_handle))?;
        Ok(())
    }

    async fn run_instance(&self, request: &inventory::LaunchRequest) -> Result<String> {
        let out = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .user_data(&request.user_data)
            .set_key_name(request.key_name.clone())
            .iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(&request.instance_profile)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify(e, "image", &request.image_id))?;

        out.instances()
            .first()
            .and_then(|i| i.instance_id())
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow::anyhow!("RunInstances returned no instance"))
    }

    async fn create_tags(&self, resource_id: &str, key: &str, value: &str) -> Result<()> {
        self.ec2
            .create_tags()
            .resources(resource_id)
            .tags(Tag::builder().key(key).value(value).build())
            .send()
            .await
            .map_err(|e| classify(e, "instance", resource_id))?;
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let out = self
            .ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| classify(e, "instance", instance_id))?;
        for change in out.terminating_instances() {
            eprintln!(
                "🧹 [AWS] instance {} {:?} -> {:?}",
                change.instance_id().unwrap_or_default(),
                change.previous_state().and_then(|s| s.name()),
                change.current_state().and_then(|s| s.name()),
            );
        }
        Ok(())
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<inventory::ImageRecord>> {
        match self.ec2.describe_images().image_ids(image_id).send().await {
            Ok(out) => Ok(out.images().first().map(image_record)),
            Err(e) => {
                let err = classify(e, "image", image_id);
                if crate::is_not_found(&err) {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn find_images_by_name(&self, name: &str) -> Result<Vec<inventory::ImageRecord>> {
        let out = self
            .ec2
            .describe_images()
            .filters(Filter::builder().name("name").values(name).build())
            .send()
            .await
            .map_err(|e| classify(e, "image", name))?;
        Ok(out.images().iter().map(image_record).collect())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        self.ec2
            .deregister_image()
            .image_id(image_id)
            .send()
            .await
            .map_err(|e| classify(e, "image", image_id))?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.ec2
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .map_err(|e| classify(e, "snapshot", snapshot_id))?;
        Ok(())
    }

    async fn export_image(&self, request: &inventory::ExportRequest) -> Result<String> {
        let out = self
            .ec2
            .export_image()
            .image_id(&request.image_id)
            .disk_image_format(DiskImageFormat::from(request.disk_format.as_str()))
            .s3_export_location(
                ExportTaskS3LocationRequest::builder()
                    .s3_bucket(&request.bucket)
                    .set_s3_prefix(request.prefix.clone())
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify(e, "image", &request.image_id))?;
        out.export_image_task_id()
            .map(|id| id.to_string())
            .ok_or_else(|| anyhow::anyhow!("ExportImage returned no task id"))
    }

    async fn describe_export_task(&self, task_id: &str) -> Result<Option<inventory::ExportTaskStatus>> {
        let out = self
            .ec2
            .describe_export_image_tasks()
            .export_image_task_ids(task_id)
            .send()
            .await
            .map_err(|e| classify(e, "export task", task_id))?;
        Ok(out.export_image_tasks().first().map(|t| inventory::ExportTaskStatus {
            task_id: t.export_image_task_id().unwrap_or(task_id).to_string(),
            status: t.status().unwrap_or("unknown").to_string(),
            status_message: t.status_message().map(|m| m.to_string()),
        }))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        let mut req = self.s3.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        req.send()
            .await
            .map_err(|e| classify(e, "bucket", bucket))?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.s3.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map_or(false, |se| se.is_not_found()) {
                    return Ok(false);
                }
                let err = classify(e, "bucket", bucket);
                if crate::is_not_found(&err) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let out = self
                .s3
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(|p| p.to_string()))
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| classify(e, "bucket", bucket))?;
            keys.extend(
                out.contents()
                    .iter()
                    .filter_map(|o| o.key().map(|k| k.to_string())),
            );
            match out.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.s3
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, "object", key))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let out = self
            .s3
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, "object", key))?;
        let bytes = out
            .body
            .collect()
            .await
            .with_context(|| format!("reading s3://{}/{}", bucket, key))?;
        Ok(bytes.into_bytes().to_vec())
    }
}

fn image_record(image: &aws_sdk_ec2::types::Image) -> inventory::ImageRecord {
    inventory::ImageRecord {
        id: image.image_id().unwrap_or_default().to_string(),
        name: image.name().map(|n| n.to_string()),
        snapshot_ids: image
            .block_device_mappings()
            .iter()
            .filter_map(|bdm| bdm.ebs().and_then(|ebs| ebs.snapshot_id()))
            .map(|s| s.to_string())
            .collect(),
    }
}
