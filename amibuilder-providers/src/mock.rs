use crate::{inventory, CloudProvider, ProviderError};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Knobs simulating the provider's lag between creation and visibility.
#[derive(Clone, Debug)]
pub struct MockBehavior {
    pub region: String,
    pub account_id: String,
    pub user_name: String,
    /// Negative profile lookups served before a new profile becomes visible.
    pub profile_visible_after: usize,
    /// Negative queue-name lookups served before a new queue resolves.
    pub queue_visible_after: usize,
    /// List calls that still report a deleted inline policy.
    pub policy_list_lag: usize,
    /// Negative head-bucket lookups served before a new bucket is visible.
    pub bucket_visible_after: usize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            region: "eu-central-1".to_string(),
            account_id: "123456789012".to_string(),
            user_name: "builder".to_string(),
            profile_visible_after: 0,
            queue_visible_after: 0,
            policy_list_lag: 0,
            bucket_visible_after: 0,
        }
    }
}

/// How the simulated worker echoes the correlation id of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerEcho {
    None,
    Attribute,
    Body,
}

/// Simulated build worker: answers every order sent to `orders_queue`
/// with a result on `results_queue`.
#[derive(Clone, Debug)]
pub struct MockWorker {
    pub orders_queue: String,
    pub results_queue: String,
    pub image_id: String,
    pub echo: WorkerEcho,
}

struct MockPolicy {
    name: String,
    deleted: bool,
    lists_remaining: usize,
}

struct MockRole {
    policies: Vec<MockPolicy>,
}

struct MockProfile {
    roles: Vec<String>,
    pending_lookups: usize,
}

struct MockQueue {
    name: String,
    pending_lookups: usize,
    messages: VecDeque<inventory::QueueMessage>,
    in_flight: Vec<inventory::QueueMessage>,
}

struct MockInstance {
    request: inventory::LaunchRequest,
    tags: Vec<(String, String)>,
    state: &'static str,
}

struct MockBucket {
    objects: BTreeMap<String, Vec<u8>>,
    pending_lookups: usize,
}

#[derive(Default)]
struct MockState {
    seq: u64,
    journal: Vec<String>,
    failures: HashMap<String, String>,
    roles: BTreeMap<String, MockRole>,
    profiles: BTreeMap<String, MockProfile>,
    user_policies: BTreeMap<(String, String), String>,
    queues: BTreeMap<String, MockQueue>,
    instances: BTreeMap<String, MockInstance>,
    images: BTreeMap<String, inventory::ImageRecord>,
    snapshots: BTreeSet<String>,
    export_tasks: BTreeMap<String, inventory::ExportTaskStatus>,
    buckets: BTreeMap<String, MockBucket>,
    worker: Option<MockWorker>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn record(&mut self, op: &str, arg: &str) -> Result<()> {
        self.journal.push(format!("{} {}", op, arg));
        if let Some(message) = self.failures.get(op) {
            return Err(anyhow::anyhow!("mock {} failed: {}", op, message));
        }
        Ok(())
    }

    fn queue_by_name(&self, name: &str) -> Option<String> {
        self.queues
            .iter()
            .find(|(_, q)| q.name == name)
            .map(|(url, _)| url.clone())
    }
}

/// In-memory provider for local runs and tests.
pub struct MockProvider {
    behavior: MockBehavior,
    state: Mutex<MockState>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue_url_for(&self, name: &str) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.behavior.region, self.behavior.account_id, name
        )
    }

    // --- Test/inspection helpers ---

    /// Every call in order, formatted as `"<op> <arg>"`.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|e| e.split(' ').next() == Some(op))
            .count()
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: &str, message: &str) {
        self.state()
            .failures
            .insert(op.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.state().failures.remove(op);
    }

    pub fn set_worker(&self, worker: MockWorker) {
        self.state().worker = Some(worker);
    }

    pub fn seed_image(&self, image: inventory::ImageRecord) {
        let mut st = self.state();
        for snap in &image.snapshot_ids {
            st.snapshots.insert(snap.clone());
        }
        st.images.insert(image.id.clone(), image);
    }

    pub fn seed_object(&self, bucket: &str, key: &str, bytes: &[u8]) {
        let mut st = self.state();
        let b = st.buckets.entry(bucket.to_string()).or_insert(MockBucket {
            objects: BTreeMap::new(),
            pending_lookups: 0,
        });
        b.objects.insert(key.to_string(), bytes.to_vec());
    }

    /// Publish a message on an existing queue. Returns false if the queue is unknown.
    pub fn push_message(&self, queue_name: &str, body: &str, attributes: HashMap<String, String>) -> bool {
        let mut st = self.state();
        let Some(url) = st.queue_by_name(queue_name) else {
            return false;
        };
        let n = st.next_id();
        if let Some(q) = st.queues.get_mut(&url) {
            q.messages.push_back(inventory::QueueMessage {
                message_id: format!("msg-{}", n),
                body: body.to_string(),
                receipt_handle: Some(format!("rh-{}", n)),
                attributes,
            });
        }
        true
    }

    pub fn set_export_status(&self, task_id: &str, status: &str, message: Option<&str>) {
        let mut st = self.state();
        if let Some(task) = st.export_tasks.get_mut(task_id) {
            task.status = status.to_string();
            task.status_message = message.map(|m| m.to_string());
        }
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state().roles.keys().cloned().collect()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.state().profiles.keys().cloned().collect()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.state().queues.values().map(|q| q.name.clone()).collect()
    }

    /// Messages waiting on a queue (excluding in-flight ones).
    pub fn pending_messages(&self, queue_name: &str) -> Vec<String> {
        let st = self.state();
        st.queues
            .values()
            .filter(|q| q.name == queue_name)
            .flat_map(|q| q.messages.iter().map(|m| m.body.clone()))
            .collect()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<&'static str> {
        self.state().instances.get(instance_id).map(|i| i.state)
    }

    pub fn instance_tags(&self, instance_id: &str) -> Vec<(String, String)> {
        self.state()
            .instances
            .get(instance_id)
            .map(|i| i.tags.clone())
            .unwrap_or_default()
    }

    pub fn instance_user_data(&self, instance_id: &str) -> Option<String> {
        self.state()
            .instances
            .get(instance_id)
            .map(|i| i.request.user_data.clone())
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.state().images.keys().cloned().collect()
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        self.state().snapshots.iter().cloned().collect()
    }

    pub fn bucket_keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_policy(&self, user_name: &str, policy_name: &str) -> Option<String> {
        self.state()
            .user_policies
            .get(&(user_name.to_string(), policy_name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn region(&self) -> String {
        self.behavior.region.clone()
    }

    async fn caller_account_id(&self) -> Result<String> {
        self.state().record("caller_account_id", "")?;
        Ok(self.behavior.account_id.clone())
    }

    async fn caller_user_name(&self) -> Result<String> {
        self.state().record("caller_user_name", "")?;
        Ok(self.behavior.user_name.clone())
    }

    async fn create_role(&self, role_name: &str, _trust_policy: &str) -> Result<String> {
        let mut st = self.state();
        st.record("create_role", role_name)?;
        if st.roles.contains_key(role_name) {
            return Err(ProviderError::already_exists("role", role_name));
        }
        st.roles.insert(
            role_name.to_string(),
            MockRole {
                policies: Vec::new(),
            },
        );
        Ok(role_name.to_string())
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        _policy_document: &str,
    ) -> Result<()> {
        let mut st = self.state();
        st.record("put_role_policy", &format!("{}/{}", role_name, policy_name))?;
        let role = st
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::not_found("role", role_name))?;
        role.policies.retain(|p| p.name != policy_name);
        role.policies.push(MockPolicy {
            name: policy_name.to_string(),
            deleted: false,
            lists_remaining: 0,
        });
        Ok(())
    }

    async fn list_role_policies(&self, role_name: &str) -> Result<Vec<String>> {
        let mut st = self.state();
        st.record("list_role_policies", role_name)?;
        let role = st
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::not_found("role", role_name))?;
        let mut names = Vec::new();
        for p in role.policies.iter_mut() {
            if !p.deleted {
                names.push(p.name.clone());
            } else if p.lists_remaining > 0 {
                names.push(p.name.clone());
                p.lists_remaining -= 1;
            }
        }
        role.policies.retain(|p| !p.deleted || p.lists_remaining > 0);
        Ok(names)
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<()> {
        let lag = self.behavior.policy_list_lag;
        let mut st = self.state();
        st.record("delete_role_policy", &format!("{}/{}", role_name, policy_name))?;
        let role = st
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ProviderError::not_found("role", role_name))?;
        let policy = role
            .policies
            .iter_mut()
            .find(|p| p.name == policy_name && !p.deleted)
            .ok_or_else(|| ProviderError::not_found("role policy", policy_name))?;
        policy.deleted = true;
        policy.lists_remaining = lag;
        role.policies.retain(|p| !p.deleted || p.lists_remaining > 0);
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_role", role_name)?;
        let role = st
            .roles
            .get(role_name)
            .ok_or_else(|| ProviderError::not_found("role", role_name))?;
        if role.policies.iter().any(|p| !p.deleted) {
            return Err(anyhow::Error::new(ProviderError::Conflict(format!(
                "role {} still has inline policies",
                role_name
            ))));
        }
        if st.profiles.values().any(|p| p.roles.iter().any(|r| r == role_name)) {
            return Err(anyhow::Error::new(ProviderError::Conflict(format!(
                "role {} is still attached to an instance profile",
                role_name
            ))));
        }
        st.roles.remove(role_name);
        Ok(())
    }

    async fn create_instance_profile(&self, profile_name: &str) -> Result<()> {
        let pending = self.behavior.profile_visible_after;
        let mut st = self.state();
        st.record("create_instance_profile", profile_name)?;
        if st.profiles.contains_key(profile_name) {
            return Err(ProviderError::already_exists("instance profile", profile_name));
        }
        st.profiles.insert(
            profile_name.to_string(),
            MockProfile {
                roles: Vec::new(),
                pending_lookups: pending,
            },
        );
        Ok(())
    }

    async fn add_role_to_instance_profile(&self, profile_name: &str, role_name: &str) -> Result<()> {
        let mut st = self.state();
        st.record(
            "add_role_to_instance_profile",
            &format!("{}/{}", profile_name, role_name),
        )?;
        if !st.roles.contains_key(role_name) {
            return Err(ProviderError::not_found("role", role_name));
        }
        let profile = st
            .profiles
            .get_mut(profile_name)
            .ok_or_else(|| ProviderError::not_found("instance profile", profile_name))?;
        // One role per profile, even when it is the same role again.
        if !profile.roles.is_empty() {
            return Err(anyhow::Error::new(ProviderError::Conflict(format!(
                "LimitExceeded: instance profile {} already holds a role",
                profile_name
            ))));
        }
        profile.roles.push(role_name.to_string());
        Ok(())
    }

    async fn remove_role_from_instance_profile(
        &self,
        profile_name: &str,
        role_name: &str,
    ) -> Result<()> {
        let mut st = self.state();
        st.record(
            "remove_role_from_instance_profile",
            &format!("{}/{}", profile_name, role_name),
        )?;
        let profile = st
            .profiles
            .get_mut(profile_name)
            .ok_or_else(|| ProviderError::not_found("instance profile", profile_name))?;
        let before = profile.roles.len();
        profile.roles.retain(|r| r != role_name);
        if profile.roles.len() == before {
            return Err(ProviderError::not_found("role binding", role_name));
        }
        Ok(())
    }

    async fn instance_profile_exists(&self, profile_name: &str) -> Result<bool> {
        let mut st = self.state();
        st.record("instance_profile_exists", profile_name)?;
        match st.profiles.get_mut(profile_name) {
            None => Ok(false),
            Some(p) if p.pending_lookups > 0 => {
                p.pending_lookups -= 1;
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    async fn instance_profile_roles(&self, profile_name: &str) -> Result<Vec<String>> {
        let mut st = self.state();
        st.record("instance_profile_roles", profile_name)?;
        st.profiles
            .get(profile_name)
            .map(|p| p.roles.clone())
            .ok_or_else(|| ProviderError::not_found("instance profile", profile_name))
    }

    async fn delete_instance_profile(&self, profile_name: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_instance_profile", profile_name)?;
        let profile = st
            .profiles
            .get(profile_name)
            .ok_or_else(|| ProviderError::not_found("instance profile", profile_name))?;
        if !profile.roles.is_empty() {
            return Err(anyhow::Error::new(ProviderError::Conflict(format!(
                "instance profile {} still has roles",
                profile_name
            ))));
        }
        st.profiles.remove(profile_name);
        Ok(())
    }

    async fn put_user_policy(
        &self,
        user_name: &str,
        policy_name: &str,
        policy_document: &str,
    ) -> Result<()> {
        let mut st = self.state();
        st.record("put_user_policy", &format!("{}/{}", user_name, policy_name))?;
        st.user_policies.insert(
            (user_name.to_string(), policy_name.to_string()),
            policy_document.to_string(),
        );
        Ok(())
    }

    async fn create_queue(&self, queue_name: &str) -> Result<String> {
        let pending = self.behavior.queue_visible_after;
        let url = self.queue_url_for(queue_name);
        let mut st = self.state();
        st.record("create_queue", queue_name)?;
        st.queues.entry(url.clone()).or_insert(MockQueue {
            name: queue_name.to_string(),
            pending_lookups: pending,
            messages: VecDeque::new(),
            in_flight: Vec::new(),
        });
        Ok(url)
    }

    async fn queue_url(&self, queue_name: &str) -> Result<Option<String>> {
        let mut st = self.state();
        st.record("queue_url", queue_name)?;
        let Some(url) = st.queue_by_name(queue_name) else {
            return Ok(None);
        };
        match st.queues.get_mut(&url) {
            Some(q) if q.pending_lookups > 0 => {
                q.pending_lookups -= 1;
                Ok(None)
            }
            Some(_) => Ok(Some(url)),
            None => Ok(None),
        }
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_queue", queue_url)?;
        st.queues
            .remove(queue_url)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found("queue", queue_url))
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String> {
        let mut st = self.state();
        st.record("send_message", queue_url)?;
        let n = st.next_id();
        let message_id = format!("msg-{}", n);
        let queue_name = {
            let q = st
                .queues
                .get_mut(queue_url)
                .ok_or_else(|| ProviderError::not_found("queue", queue_url))?;
            q.messages.push_back(inventory::QueueMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                receipt_handle: Some(format!("rh-{}", n)),
                attributes: attributes.clone(),
            });
            q.name.clone()
        };

        // Simulated worker: consume the order and publish a result.
        let worker = st.worker.clone();
        if let Some(worker) = worker.filter(|w| w.orders_queue == queue_name) {
            let correlation = attributes.get("CorrelationId").cloned();
            if let Some(q) = st.queues.get_mut(queue_url) {
                q.messages.retain(|m| m.message_id != message_id);
            }
            let mut result = serde_json::json!({ "result": { "amiId": worker.image_id } });
            let mut result_attrs = HashMap::new();
            match (worker.echo, correlation) {
                (WorkerEcho::Body, Some(c)) => {
                    result["correlationId"] = serde_json::json!(c);
                }
                (WorkerEcho::Attribute, Some(c)) => {
                    result_attrs.insert("CorrelationId".to_string(), c);
                }
                _ => {}
            }
            if let Some(results_url) = st.queue_by_name(&worker.results_queue) {
                let n = st.next_id();
                if let Some(q) = st.queues.get_mut(&results_url) {
                    q.messages.push_back(inventory::QueueMessage {
                        message_id: format!("msg-{}", n),
                        body: result.to_string(),
                        receipt_handle: Some(format!("rh-{}", n)),
                        attributes: result_attrs,
                    });
                }
            }
        }

        Ok(message_id)
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        wait_seconds: i32,
        max_messages: i32,
    ) -> Result<Vec<inventory::QueueMessage>> {
        let mut st = self.state();
        st.record(
            "receive_messages",
            &format!("{} wait={}", queue_url, wait_seconds),
        )?;
        let q = st
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| ProviderError::not_found("queue", queue_url))?;
        let mut out = Vec::new();
        while out.len() < max_messages.max(1) as usize {
            let Some(m) = q.messages.pop_front() else {
                break;
            };
            q.in_flight.push(m.clone());
            out.push(m);
        }
        Ok(out)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_message", receipt_handle)?;
        let q = st
            .queues
            .get_mut(queue_url)
            .ok_or_else(|| ProviderError::not_found("queue", queue_url))?;
        let before = q.in_flight.len();
        q.in_flight
            .retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        if q.in_flight.len() == before {
            return Err(ProviderError::not_found("message", receipt_handle));
        }
        Ok(())
    }

    async fn run_instance(&self, request: &inventory::LaunchRequest) -> Result<String> {
        let mut st = self.state();
        st.record("run_instance", &request.instance_profile)?;
        if !st.profiles.contains_key(&request.instance_profile) {
            return Err(anyhow::anyhow!(
                "Value ({}) for parameter iamInstanceProfile.name is invalid",
                request.instance_profile
            ));
        }
        let id = format!("i-{:017x}", st.next_id());
        st.instances.insert(
            id.clone(),
            MockInstance {
                request: request.clone(),
                tags: Vec::new(),
                state: "running",
            },
        );
        Ok(id)
    }

    async fn create_tags(&self, resource_id: &str, key: &str, value: &str) -> Result<()> {
        let mut st = self.state();
        st.record("create_tags", resource_id)?;
        let instance = st
            .instances
            .get_mut(resource_id)
            .ok_or_else(|| ProviderError::not_found("instance", resource_id))?;
        instance.tags.push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut st = self.state();
        st.record("terminate_instance", instance_id)?;
        let instance = st
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::not_found("instance", instance_id))?;
        instance.state = "terminated";
        Ok(())
    }

    async fn describe_image(&self, image_id: &str) -> Result<Option<inventory::ImageRecord>> {
        let mut st = self.state();
        st.record("describe_image", image_id)?;
        Ok(st.images.get(image_id).cloned())
    }

    async fn find_images_by_name(&self, name: &str) -> Result<Vec<inventory::ImageRecord>> {
        let mut st = self.state();
        st.record("find_images_by_name", name)?;
        Ok(st
            .images
            .values()
            .filter(|i| i.name.as_deref() == Some(name))
            .cloned()
            .collect())
    }

    async fn deregister_image(&self, image_id: &str) -> Result<()> {
        let mut st = self.state();
        st.record("deregister_image", image_id)?;
        st.images
            .remove(image_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found("image", image_id))
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_snapshot", snapshot_id)?;
        if !st.snapshots.remove(snapshot_id) {
            return Err(ProviderError::not_found("snapshot", snapshot_id));
        }
        Ok(())
    }

    async fn export_image(&self, request: &inventory::ExportRequest) -> Result<String> {
        let mut st = self.state();
        st.record("export_image", &request.image_id)?;
        if !st.images.contains_key(&request.image_id) {
            return Err(ProviderError::not_found("image", &request.image_id));
        }
        if !st.buckets.contains_key(&request.bucket) {
            return Err(ProviderError::not_found("bucket", &request.bucket));
        }
        let task_id = format!("export-ami-{:017x}", st.next_id());
        st.export_tasks.insert(
            task_id.clone(),
            inventory::ExportTaskStatus {
                task_id: task_id.clone(),
                status: "active".to_string(),
                status_message: None,
            },
        );
        Ok(task_id)
    }

    async fn describe_export_task(&self, task_id: &str) -> Result<Option<inventory::ExportTaskStatus>> {
        let mut st = self.state();
        st.record("describe_export_task", task_id)?;
        Ok(st.export_tasks.get(task_id).cloned())
    }

    async fn create_bucket(&self, bucket: &str, _region: &str) -> Result<()> {
        let pending = self.behavior.bucket_visible_after;
        let mut st = self.state();
        st.record("create_bucket", bucket)?;
        if st.buckets.contains_key(bucket) {
            return Err(ProviderError::already_exists("bucket", bucket));
        }
        st.buckets.insert(
            bucket.to_string(),
            MockBucket {
                objects: BTreeMap::new(),
                pending_lookups: pending,
            },
        );
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let mut st = self.state();
        st.record("bucket_exists", bucket)?;
        match st.buckets.get_mut(bucket) {
            None => Ok(false),
            Some(b) if b.pending_lookups > 0 => {
                b.pending_lookups -= 1;
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut st = self.state();
        st.record("list_objects", bucket)?;
        let b = st
            .buckets
            .get(bucket)
            .ok_or_else(|| ProviderError::not_found("bucket", bucket))?;
        Ok(b.objects
            .keys()
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut st = self.state();
        st.record("delete_object", &format!("{}/{}", bucket, key))?;
        let b = st
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ProviderError::not_found("bucket", bucket))?;
        b.objects.remove(key);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let mut st = self.state();
        st.record("get_object", &format!("{}/{}", bucket, key))?;
        st.buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .cloned()
            .ok_or_else(|| ProviderError::not_found("object", key))
    }
}
