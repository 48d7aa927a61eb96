use amibuilder_common::QueueAddress;
use amibuilder_providers::{is_already_exists, CloudProvider};
use serde_json::json;

use crate::config::OrchestratorConfig;
use crate::error::BuildError;
use crate::logger::ActionTimer;
use crate::resources::ProvisionedResourceSet;
use crate::retry::{wait_until, WaitOutcome};

/// Trust policy letting the compute service assume the worker role.
pub fn compute_trust_policy() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Permissions the build worker needs: image/volume/snapshot/instance
/// lifecycle plus send/receive on its own queue pair.
pub fn worker_policy(orders: &QueueAddress, results: &QueueAddress) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "EC2Resources",
                "Effect": "Allow",
                "Action": [
                    "ec2:CreateTags",
                    "ec2:DescribeVolumes",
                    "ec2:CreateVolume",
                    "ec2:DeleteVolume",
                    "ec2:AttachVolume",
                    "ec2:DetachVolume",
                    "ec2:DescribeSnapshots",
                    "ec2:CreateSnapshot",
                    "ec2:DescribeImages",
                    "ec2:RegisterImage",
                    "ec2:DescribeInstances"
                ],
                "Resource": "*"
            },
            {
                "Sid": "SQSOrders",
                "Effect": "Allow",
                "Action": [
                    "sqs:GetQueueUrl",
                    "sqs:ReceiveMessage",
                    "sqs:DeleteMessage",
                    "sqs:SendMessage"
                ],
                "Resource": orders.arn()
            },
            {
                "Sid": "SQSResults",
                "Effect": "Allow",
                "Action": [
                    "sqs:GetQueueUrl",
                    "sqs:ReceiveMessage",
                    "sqs:DeleteMessage",
                    "sqs:SendMessage"
                ],
                "Resource": results.arn()
            }
        ]
    })
}

/// Permissions the operator needs to drive a build from their own user.
pub fn operator_policy(orders: &QueueAddress, results: &QueueAddress) -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "EC2Resources",
                "Effect": "Allow",
                "Action": [
                    "ec2:CreateTags",
                    "ec2:DescribeVolumes",
                    "ec2:CreateVolume",
                    "ec2:DeleteVolume",
                    "ec2:AttachVolume",
                    "ec2:DetachVolume",
                    "ec2:DescribeSnapshots",
                    "ec2:CreateSnapshot",
                    "ec2:DescribeImages",
                    "ec2:RegisterImage",
                    "ec2:DeregisterImage",
                    "ec2:DeleteSnapshot",
                    "ec2:RunInstances",
                    "ec2:TerminateInstances",
                    "ssm:GetParameters",
                    "iam:PassRole",
                    "iam:CreateRole",
                    "iam:CreateInstanceProfile",
                    "iam:AddRoleToInstanceProfile"
                ],
                "Resource": "*"
            },
            {
                "Sid": "SQSResourcesReceive",
                "Effect": "Allow",
                "Action": [
                    "sqs:GetQueueUrl",
                    "sqs:ReceiveMessage",
                    "sqs:DeleteMessage",
                    "sqs:SendMessage"
                ],
                "Resource": orders.arn()
            },
            {
                "Sid": "SQSResourcesSend",
                "Effect": "Allow",
                "Action": [
                    "sqs:GetQueueUrl",
                    "sqs:SendMessage",
                    "sqs:ReceiveMessage"
                ],
                "Resource": results.arn()
            },
            {
                "Effect": "Allow",
                "Action": ["sqs:DeleteQueue", "sqs:CreateQueue"],
                "Resource": "*"
            }
        ]
    })
}

/// Creates the identity and queue resources a build worker needs.
pub struct Provisioner<'a> {
    provider: &'a dyn CloudProvider,
    config: &'a OrchestratorConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(provider: &'a dyn CloudProvider, config: &'a OrchestratorConfig) -> Self {
        Self { provider, config }
    }

    /// Populate `set` step by step. On error the set holds whatever was
    /// created so far; no rollback happens here.
    pub async fn provision(&self, set: &mut ProvisionedResourceSet) -> Result<(), BuildError> {
        let run_id = set.run_id.clone();
        let names = set.names.clone();

        // Role
        let timer = ActionTimer::start(
            "PROVISION_ROLE",
            &run_id,
            Some(json!({ "role": names.role })),
        );
        let trust = compute_trust_policy().to_string();
        let role = match self.provider.create_role(&names.role, &trust).await {
            Ok(role) => role,
            Err(e) if is_already_exists(&e) => {
                tracing::warn!(run_id = %run_id, role = %names.role, "⚠️ [provisioner] role already exists, reusing it");
                names.role.clone()
            }
            Err(e) => {
                timer.failure(&e);
                return Err(BuildError::provider("create role", e));
            }
        };
        set.role_name = Some(role.clone());
        timer.success();

        let timer = ActionTimer::start(
            "PROVISION_ROLE_POLICY",
            &run_id,
            Some(json!({ "role": role, "policy": names.inline_policy })),
        );
        let policy = worker_policy(&set.orders_address(), &set.results_address()).to_string();
        timer
            .finish(
                self.provider
                    .put_role_policy(&role, &names.inline_policy, &policy)
                    .await,
            )
            .map_err(|e| BuildError::provider("put role policy", e))?;
        if !set.inline_policies.contains(&names.inline_policy) {
            set.inline_policies.push(names.inline_policy.clone());
        }

        // Instance profile
        let timer = ActionTimer::start(
            "PROVISION_INSTANCE_PROFILE",
            &run_id,
            Some(json!({ "instance_profile": names.instance_profile })),
        );
        let reused = match self
            .provider
            .create_instance_profile(&names.instance_profile)
            .await
        {
            Ok(()) => false,
            Err(e) if is_already_exists(&e) => {
                tracing::warn!(run_id = %run_id, profile = %names.instance_profile, "⚠️ [provisioner] instance profile already exists, reusing it");
                true
            }
            Err(e) => {
                timer.failure(&e);
                return Err(BuildError::provider("create instance profile", e));
            }
        };
        set.instance_profile_name = Some(names.instance_profile.clone());

        // A reused profile may still hold the role from an earlier run.
        let already_bound = if reused {
            match self.provider.instance_profile_roles(&names.instance_profile).await {
                Ok(roles) => roles.iter().any(|r| r == &role),
                Err(e) => {
                    timer.failure(&e);
                    return Err(BuildError::provider("inspect instance profile", e));
                }
            }
        } else {
            false
        };
        if already_bound {
            tracing::info!(run_id = %run_id, profile = %names.instance_profile, role = %role, "🔗 [provisioner] role already bound to instance profile");
        } else if let Err(e) = self
            .provider
            .add_role_to_instance_profile(&names.instance_profile, &role)
            .await
        {
            timer.failure(&e);
            return Err(BuildError::provider("add role to instance profile", e));
        }
        set.role_attached = true;
        timer.success();

        let provider = self.provider;
        let profile_name = names.instance_profile.as_str();
        let outcome = wait_until(
            "instance profile",
            &self.config.waits.instance_profile,
            move || provider.instance_profile_exists(profile_name),
        )
        .await?;
        if let WaitOutcome::Ready { attempts } = outcome {
            tracing::info!(run_id = %run_id, profile = %profile_name, attempts, "✅ [provisioner] instance profile visible");
        }

        // Queues
        for (label, queue_name) in [
            ("orders", names.queues.orders.as_str()),
            ("results", names.queues.results.as_str()),
        ] {
            let timer = ActionTimer::start(
                "PROVISION_QUEUE",
                &run_id,
                Some(json!({ "queue": queue_name })),
            );
            let url = timer
                .finish(self.provider.create_queue(queue_name).await)
                .map_err(|e| BuildError::provider("create queue", e))?;
            tracing::info!(run_id = %run_id, queue = %queue_name, url = %url, "📬 [provisioner] {} queue created", label);
            if label == "orders" {
                set.orders_queue_url = Some(url);
            } else {
                set.results_queue_url = Some(url);
            }
        }

        let results_name = names.queues.results.as_str();
        wait_until(
            "results queue",
            &self.config.waits.results_queue,
            move || async move { Ok::<bool, anyhow::Error>(provider.queue_url(results_name).await?.is_some()) },
        )
        .await?;

        tracing::info!(run_id = %run_id, "✅ [provisioner] resources ready");
        Ok(())
    }

    /// Put an inline policy on the calling user granting what an operator
    /// needs to drive builds against this run's queues. Returns the user name.
    pub async fn grant_operator_permissions(
        &self,
        set: &ProvisionedResourceSet,
    ) -> Result<String, BuildError> {
        let user = self
            .provider
            .caller_user_name()
            .await
            .map_err(|e| BuildError::ProviderUnavailable(format!("caller user: {:#}", e)))?;
        let document = operator_policy(&set.orders_address(), &set.results_address()).to_string();
        let timer = ActionTimer::start(
            "GRANT_OPERATOR_POLICY",
            &set.run_id,
            Some(json!({ "user": user, "policy": set.names.operator_policy })),
        );
        timer
            .finish(
                self.provider
                    .put_user_policy(&user, &set.names.operator_policy, &document)
                    .await,
            )
            .map_err(|e| BuildError::provider("put user policy", e))?;
        Ok(user)
    }
}
