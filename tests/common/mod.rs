//! Common test utilities for integration tests
//!
//! [`MockExecutor`] stands in for every external program the reconciler
//! runs. It records each call, answers scripted responses first, and
//! otherwise simulates a small control plane:
//!
//! - `gcloud compute instances ...` keeps VMs that provision and stop over a
//!   configurable number of describes, described with the full document the
//!   real tool prints
//! - `gcloud secrets ...` keeps the latest payload per secret; a secret can
//!   also exist with no version at all
//! - `openssl ...` writes placeholder key/cert files that remember their SANs
//!   and validity so read-backs behave like the real tool
//! - anything else succeeds with empty output

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use infra_reconciler::controller::executor::{ExecError, ExecOptions, ExecutionResult, ProcessExecutor};
use infra_reconciler::ReconcilerConfig;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Call {
    /// `program arg1 arg2 ...`
    pub fn line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
struct FakeVm {
    id: String,
    status: &'static str,
    /// Describes left before the pending transition completes
    remaining: usize,
    machine_type: String,
    labels: BTreeMap<String, String>,
    min_cpu_platform: Option<String>,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    once: Vec<(String, VecDeque<ExecutionResult>)>,
    always: Vec<(String, ExecutionResult)>,
    vms: BTreeMap<String, FakeVm>,
    secrets: BTreeMap<String, String>,
    /// Secrets that exist but hold no version yet
    empty_secrets: BTreeSet<String>,
    /// SAN the fake signer silently leaves out
    dropped_san: Option<String>,
}

/// Recording executor with scripted responses and a simulated control plane
pub struct MockExecutor {
    state: Mutex<MockState>,
    settle_after: usize,
    next_id: AtomicU64,
}

impl std::fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutor")
            .field("settle_after", &self.settle_after)
            .finish_non_exhaustive()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new(2)
    }
}

impl MockExecutor {
    /// VMs report `PROVISIONING`/`STOPPING` for `settle_after` describes
    /// after a create/delete before settling
    pub fn new(settle_after: usize) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            settle_after,
            next_id: AtomicU64::new(4_611_686_018_427_387_904),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Answer the next call whose line starts with `prefix` with `result`
    pub fn respond_once(&self, prefix: &str, result: ExecutionResult) {
        let mut state = self.lock();
        match state.once.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(result),
            None => state
                .once
                .push((prefix.to_string(), VecDeque::from([result]))),
        }
    }

    /// Answer every call whose line starts with `prefix` with `result`
    pub fn respond_always(&self, prefix: &str, result: ExecutionResult) {
        self.lock().always.push((prefix.to_string(), result));
    }

    /// Leave `san` out of every certificate the fake signer issues
    pub fn drop_san(&self, san: &str) {
        self.lock().dropped_san = Some(san.to_string());
    }

    /// Pretend a VM already exists and is running
    pub fn seed_vm(&self, name: &str, machine_type: &str) {
        let id = self.fresh_id();
        self.lock().vms.insert(
            name.to_string(),
            FakeVm {
                id,
                status: "RUNNING",
                remaining: 0,
                machine_type: machine_type.to_string(),
                labels: BTreeMap::new(),
                min_cpu_platform: None,
            },
        );
    }

    /// Pretend a VM never finishes provisioning
    pub fn seed_stuck_vm(&self, name: &str) {
        let id = self.fresh_id();
        self.lock().vms.insert(
            name.to_string(),
            FakeVm {
                id,
                status: "PROVISIONING",
                remaining: usize::MAX,
                machine_type: "e2-small".to_string(),
                labels: BTreeMap::new(),
                min_cpu_platform: None,
            },
        );
    }

    /// Stored payload of secret `name`
    pub fn secret_payload(&self, name: &str) -> Option<String> {
        self.lock().secrets.get(name).cloned()
    }

    pub fn seed_secret(&self, name: &str, payload: &str) {
        self.lock()
            .secrets
            .insert(name.to_string(), payload.to_string());
    }

    /// Pretend `secrets create` succeeded but the first version never landed
    pub fn seed_empty_secret(&self, name: &str) {
        self.lock().empty_secrets.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls whose line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.line().starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn fresh_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn scripted(&self, line: &str) -> Option<ExecutionResult> {
        let mut state = self.lock();
        if let Some((_, queue)) = state
            .once
            .iter_mut()
            .find(|(prefix, queue)| line.starts_with(prefix.as_str()) && !queue.is_empty())
        {
            return queue.pop_front();
        }
        state
            .always
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
    }

    fn simulate(&self, call: &Call) -> ExecutionResult {
        let program = Path::new(&call.program)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&call.program);
        let args: Vec<&str> = call.args.iter().map(String::as_str).collect();
        match (program, args.as_slice()) {
            ("gcloud", ["compute", "instances", verb, name, rest @ ..]) => {
                self.compute(verb, name, rest)
            }
            ("gcloud", ["secrets", "versions", "access", "latest", secret, ..]) => {
                let name = secret.trim_start_matches("--secret=");
                match self.lock().secrets.get(name) {
                    Some(payload) => ExecutionResult::success(payload.clone()),
                    None => ExecutionResult::failure(
                        1,
                        format!(
                            "ERROR: (gcloud.secrets.versions.access) NOT_FOUND: Secret [projects/p/secrets/{name}] not found or has no versions."
                        ),
                    ),
                }
            }
            ("gcloud", ["secrets", "create", name, ..]) => {
                let mut state = self.lock();
                if state.secrets.contains_key(*name) || state.empty_secrets.contains(*name) {
                    return ExecutionResult::failure(
                        1,
                        format!("ERROR: (gcloud.secrets.create) ALREADY_EXISTS: Secret [{name}] already exists."),
                    );
                }
                state
                    .secrets
                    .insert((*name).to_string(), call.stdin.clone().unwrap_or_default());
                ExecutionResult::success("")
            }
            ("gcloud", ["secrets", "versions", "add", name, ..]) => {
                let mut state = self.lock();
                if !state.secrets.contains_key(*name) && !state.empty_secrets.remove(*name) {
                    return ExecutionResult::failure(
                        1,
                        format!("ERROR: (gcloud.secrets.versions.add) NOT_FOUND: Secret [projects/p/secrets/{name}] not found."),
                    );
                }
                state
                    .secrets
                    .insert((*name).to_string(), call.stdin.clone().unwrap_or_default());
                ExecutionResult::success("")
            }
            ("gcloud", ["secrets", "delete", name, ..]) => {
                let mut state = self.lock();
                state.secrets.remove(*name);
                state.empty_secrets.remove(*name);
                ExecutionResult::success("")
            }
            ("openssl", _) => self.openssl(&args),
            _ => ExecutionResult::success(""),
        }
    }

    fn compute(&self, verb: &str, name: &str, rest: &[&str]) -> ExecutionResult {
        let flag = |prefix: &str| {
            rest.iter()
                .find_map(|arg| arg.strip_prefix(prefix))
                .map(str::to_string)
        };
        let not_found = || {
            ExecutionResult::failure(
                1,
                format!(
                    "ERROR: (gcloud.compute.instances.{verb}) Could not fetch resource:\n - The resource 'projects/p/zones/z/instances/{name}' was not found"
                ),
            )
        };

        match verb {
            "describe" => {
                let mut state = self.lock();
                let Some((status, remaining)) =
                    state.vms.get(name).map(|vm| (vm.status, vm.remaining))
                else {
                    return not_found();
                };
                if remaining == 0 && status == "STOPPING" {
                    state.vms.remove(name);
                    return not_found();
                }
                let Some(vm) = state.vms.get_mut(name) else {
                    return not_found();
                };
                if remaining == 0 {
                    if status == "PROVISIONING" {
                        vm.status = "RUNNING";
                    }
                } else if remaining != usize::MAX {
                    vm.remaining -= 1;
                }
                ExecutionResult::success(describe_json(name, vm))
            }
            "create" => {
                let id = self.fresh_id();
                let mut state = self.lock();
                if state.vms.contains_key(name) {
                    return ExecutionResult::failure(
                        1,
                        format!("ERROR: (gcloud.compute.instances.create) The resource '{name}' already exists"),
                    );
                }
                let cpu = flag("--custom-cpu=").unwrap_or_else(|| "1".to_string());
                let memory = flag("--custom-memory=").map_or(1024, |m| memory_mb(&m));
                let vm = FakeVm {
                    id,
                    status: "PROVISIONING",
                    remaining: self.settle_after,
                    machine_type: format!("custom-{cpu}-{memory}"),
                    labels: flag("--labels=").map(|l| parse_labels(&l)).unwrap_or_default(),
                    min_cpu_platform: flag("--min-cpu-platform="),
                };
                let output = format!("[{}]", describe_json(name, &vm));
                state.vms.insert(name.to_string(), vm);
                ExecutionResult::success(output)
            }
            "update" => {
                let mut state = self.lock();
                let Some(vm) = state.vms.get_mut(name) else {
                    return not_found();
                };
                if let Some(labels) = flag("--update-labels=") {
                    vm.labels.extend(parse_labels(&labels));
                }
                if let Some(platform) = flag("--min-cpu-platform=") {
                    vm.min_cpu_platform = Some(platform);
                }
                ExecutionResult::success(describe_json(name, vm))
            }
            "delete" => {
                let mut state = self.lock();
                let Some(vm) = state.vms.get_mut(name) else {
                    return not_found();
                };
                vm.status = "STOPPING";
                vm.remaining = self.settle_after;
                ExecutionResult::success("")
            }
            _ => ExecutionResult::failure(2, format!("ERROR: unknown verb {verb}")),
        }
    }

    fn openssl(&self, args: &[&str]) -> ExecutionResult {
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| *a == flag)
                .and_then(|i| args.get(i + 1))
                .map(|s| (*s).to_string())
        };
        let write = |path: &str, content: &str| std::fs::write(path, content).map_err(|e| e.to_string());

        let outcome = match args.first().copied() {
            // CA: req -x509 -newkey ... -keyout K -out C -days D
            Some("req") if args.contains(&"-x509") => {
                let days = value_of("-days").unwrap_or_else(|| "1".to_string());
                value_of("-keyout")
                    .ok_or_else(|| "missing -keyout".to_string())
                    .and_then(|key| write(&key, "FAKE CA KEY\n"))
                    .and_then(|()| {
                        let out = value_of("-out").ok_or_else(|| "missing -out".to_string())?;
                        write(&out, &format!("FAKE CERT\ndays={days}\nsans=\n"))
                    })
                    .map(|()| String::new())
            }
            Some("genpkey") => value_of("-out")
                .ok_or_else(|| "missing -out".to_string())
                .and_then(|key| write(&key, &format!("FAKE KEY {}\n", self.fresh_id())))
                .map(|()| String::new()),
            Some("req") => value_of("-out")
                .ok_or_else(|| "missing -out".to_string())
                .and_then(|csr| write(&csr, "FAKE CSR\n"))
                .map(|()| String::new()),
            // Sign: x509 -req ... -out C -days D -extfile E
            Some("x509") if args.contains(&"-req") => {
                let days = value_of("-days").unwrap_or_else(|| "1".to_string());
                let dropped = self.lock().dropped_san.clone();
                value_of("-extfile")
                    .ok_or_else(|| "missing -extfile".to_string())
                    .and_then(|ext| std::fs::read_to_string(ext).map_err(|e| e.to_string()))
                    .and_then(|ext| {
                        let sans: Vec<String> = ext
                            .lines()
                            .filter(|l| l.starts_with("DNS.") || l.starts_with("IP."))
                            .map(|l| {
                                let (kind, value) = l.split_once('=').unwrap_or((l, ""));
                                let kind = if kind.starts_with("IP") { "IP Address" } else { "DNS" };
                                format!("{kind}:{value}")
                            })
                            .filter(|san| dropped.as_ref().map_or(true, |d| !san.ends_with(d.as_str())))
                            .collect();
                        let out = value_of("-out").ok_or_else(|| "missing -out".to_string())?;
                        write(
                            &out,
                            &format!("FAKE CERT {}\ndays={days}\nsans={}\n", self.fresh_id(), sans.join(", ")),
                        )
                    })
                    .map(|()| String::new())
            }
            Some("x509") => {
                let cert = value_of("-in").unwrap_or_default();
                std::fs::read_to_string(&cert)
                    .map_err(|e| format!("Could not open file or uri for loading certificate from {cert}: {e}"))
                    .map(|content| {
                        let field = |name: &str| {
                            content
                                .lines()
                                .find_map(|l| l.strip_prefix(name))
                                .unwrap_or_default()
                                .to_string()
                        };
                        if args.contains(&"subjectAltName") {
                            format!("X509v3 Subject Alternative Name: \n    {}\n", field("sans="))
                        } else {
                            let days: i64 = field("days=").parse().unwrap_or(1);
                            let now = Utc::now();
                            format!(
                                "notBefore={}\nnotAfter={}\n",
                                now.format("%b %e %H:%M:%S %Y GMT"),
                                (now + ChronoDuration::days(days)).format("%b %e %H:%M:%S %Y GMT")
                            )
                        }
                    })
            }
            _ => Err(format!("unsupported openssl invocation: {}", args.join(" "))),
        };

        match outcome {
            Ok(stdout) => ExecutionResult::success(stdout),
            Err(message) => ExecutionResult::failure(1, message),
        }
    }
}

/// `gcloud compute instances describe --format=json` as the real tool prints it
fn describe_json(name: &str, vm: &FakeVm) -> String {
    let base = "https://www.googleapis.com/compute/v1/projects/p";
    let zone = format!("{base}/zones/europe-west1-b");
    let mut doc = serde_json::json!({
        "canIpForward": false,
        "cpuPlatform": "Intel Broadwell",
        "creationTimestamp": "2024-05-02T03:04:05.678-07:00",
        "deletionProtection": false,
        "disks": [{
            "autoDelete": true,
            "boot": true,
            "deviceName": name,
            "diskSizeGb": "10",
            "index": 0,
            "interface": "SCSI",
            "kind": "compute#attachedDisk",
            "mode": "READ_WRITE",
            "source": format!("{zone}/disks/{name}"),
            "type": "PERSISTENT"
        }],
        "fingerprint": format!("fp-{}", vm.id),
        "id": vm.id,
        "kind": "compute#instance",
        "labelFingerprint": "42WmSpB8rSM=",
        "machineType": format!("{zone}/machineTypes/{}", vm.machine_type),
        "metadata": {"fingerprint": "nRbJ1Xf5Zs0=", "kind": "compute#metadata"},
        "name": name,
        "networkInterfaces": [{
            "accessConfigs": [{
                "kind": "compute#accessConfig",
                "name": "External NAT",
                "natIP": "34.76.1.2",
                "networkTier": "PREMIUM",
                "type": "ONE_TO_ONE_NAT"
            }],
            "kind": "compute#networkInterface",
            "name": "nic0",
            "network": format!("{base}/global/networks/default"),
            "networkIP": "10.132.0.2",
            "stackType": "IPV4_ONLY",
            "subnetwork": format!("{base}/regions/europe-west1/subnetworks/default")
        }],
        "scheduling": {
            "automaticRestart": true,
            "onHostMaintenance": "MIGRATE",
            "preemptible": false,
            "provisioningModel": "STANDARD"
        },
        "selfLink": format!("{zone}/instances/{name}"),
        "serviceAccounts": [{
            "email": "123456789-compute@developer.gserviceaccount.com",
            "scopes": ["https://www.googleapis.com/auth/devstorage.read_only"]
        }],
        "shieldedInstanceConfig": {
            "enableIntegrityMonitoring": true,
            "enableSecureBoot": false,
            "enableVtpm": true
        },
        "startRestricted": false,
        "status": vm.status,
        "tags": {"fingerprint": "42WmSpB8rSM="},
        "zone": zone,
    });
    // Unset fields are left out rather than printed empty
    if !vm.labels.is_empty() {
        doc["labels"] = serde_json::json!(vm.labels);
    }
    if let Some(platform) = &vm.min_cpu_platform {
        doc["minCpuPlatform"] = serde_json::json!(platform);
    }
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

/// `--custom-memory` in MB; a bare number is GB
fn memory_mb(raw: &str) -> u64 {
    let upper = raw.to_ascii_uppercase();
    match upper.strip_suffix("MB") {
        Some(mb) => mb.parse().unwrap_or(1024),
        None => upper.trim_end_matches("GB").parse::<u64>().unwrap_or(1) * 1024,
    }
}

fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl ProcessExecutor for MockExecutor {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecutionResult, ExecError> {
        let call = Call {
            program: command.to_string(),
            args: args.to_vec(),
            stdin: opts
                .stdin
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        };
        let line = call.line();
        self.lock().calls.push(call.clone());

        Ok(match self.scripted(&line) {
            Some(result) => result,
            None => self.simulate(&call),
        })
    }
}

/// Fast polling, a short provisioning limit and a private certificate store
pub fn test_config(store_dir: &Path) -> ReconcilerConfig {
    ReconcilerConfig {
        poll_initial_ms: 1,
        poll_max_ms: 5,
        provisioning_max_wait_secs: 5,
        cert_store_dir: store_dir.to_path_buf(),
        ..ReconcilerConfig::default()
    }
}
