//! In-memory stand-in for a container runtime reached through an executor.
//!
//! Understands the subset of the docker CLI the engine issues, keeps
//! containers, networks and volumes in memory and records every command.
#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use gantry::{CancelHandle, ExecError, Executor};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

pub const HOME: &str = "/home/deploy";

#[derive(Debug, Clone, Default)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image_ref: String,
    pub image_id: String,
    pub labels: BTreeMap<String, String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub forwards: Vec<String>,
    pub networks: BTreeMap<String, Vec<String>>,
    pub running: bool,
    pub has_healthcheck: bool,
}

#[derive(Default)]
struct State {
    registry: HashMap<String, String>,
    pulled: HashMap<String, String>,
    unhealthy: HashSet<String>,
    networks: BTreeSet<String>,
    volumes: BTreeSet<String>,
    dirs: BTreeSet<String>,
    containers: Vec<Container>,
    next_id: u64,
    log: Vec<String>,
    copied: Vec<(String, String)>,
    files: BTreeMap<String, String>,
    watch: Option<(String, String)>,
    samples: Vec<Vec<String>>,
    fail_on: Option<String>,
    cancel_on: Option<(String, CancelHandle)>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

fn failed(line: &str, stderr: impl Into<String>) -> ExecError {
    ExecError::Failed {
        command: line.to_string(),
        status: Some(1),
        stderr: stderr.into(),
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.state.lock().unwrap().networks.insert("bridge".to_string());
        runtime
    }

    /// Makes `image` pullable, resolving to `id`. Calling it again moves the tag.
    pub fn publish(&self, image: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .registry
            .insert(image.to_string(), id.to_string());
    }

    /// Containers created from image `id` never report healthy.
    pub fn never_healthy(&self, id: &str) {
        self.state.lock().unwrap().unhealthy.insert(id.to_string());
    }

    /// Records which containers answer `alias` on `network` after every command.
    pub fn watch_alias(&self, network: &str, alias: &str) {
        self.state.lock().unwrap().watch = Some((network.to_string(), alias.to_string()));
    }

    /// The next command whose line starts with `prefix` fails.
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().unwrap().fail_on = Some(prefix.to_string());
    }

    /// Requests cancellation while the command starting with `prefix` runs.
    pub fn cancel_on(&self, prefix: &str, handle: CancelHandle) {
        self.state.lock().unwrap().cancel_on = Some((prefix.to_string(), handle));
    }

    pub fn add_network(&self, network: &str) {
        self.state.lock().unwrap().networks.insert(network.to_string());
    }

    /// Places a container directly into the runtime, bypassing the engine.
    pub fn insert_container(&self, mut container: Container) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        if container.id.is_empty() {
            container.id = format!("{:064x}", state.next_id);
        }
        state.containers.push(container);
    }

    pub fn container(&self, name: &str) -> Option<Container> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn alias_holders(&self, network: &str, alias: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        holders(&state, network, alias)
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.iter().cloned().collect()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    pub fn samples(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().samples.clone()
    }

    pub fn copied(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().copied.clone()
    }

    /// Current contents of a file copied to the host.
    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn handle(&self, command: &str, args: &[String]) -> Result<Vec<u8>, ExecError> {
        let mut state = self.state.lock().unwrap();
        let line = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        state.log.push(line.clone());

        if let Some((prefix, _)) = &state.cancel_on
            && line.starts_with(prefix.as_str())
        {
            let (_, handle) = state.cancel_on.take().unwrap();
            handle.cancel();
        }
        if let Some(prefix) = &state.fail_on
            && line.starts_with(prefix.as_str())
        {
            state.fail_on = None;
            return Err(failed(&line, "injected failure"));
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = match (command, args.as_slice()) {
            ("sh", ["-c", "echo $HOME"]) => Ok(HOME.to_string()),
            ("mkdir", ["-p", path]) => {
                state.dirs.insert(path.to_string());
                Ok(String::new())
            }
            ("cat", [path]) => state
                .files
                .get(*path)
                .cloned()
                .ok_or_else(|| failed(&line, format!("cat: {path}: No such file or directory"))),
            ("docker", args) => docker(&mut state, &line, args),
            _ => Err(failed(&line, "command not found")),
        };

        if let Some((network, alias)) = state.watch.clone() {
            let sample = holders(&state, &network, &alias);
            state.samples.push(sample);
        }
        output.map(String::into_bytes)
    }
}

fn holders(state: &State, network: &str, alias: &str) -> Vec<String> {
    state
        .containers
        .iter()
        .filter(|c| {
            c.networks
                .get(network)
                .is_some_and(|aliases| aliases.iter().any(|a| a == alias))
        })
        .map(|c| c.name.clone())
        .collect()
}

fn find<'a>(state: &'a mut State, target: &str) -> Option<&'a mut Container> {
    state
        .containers
        .iter_mut()
        .find(|c| c.id == target || c.name == target)
}

fn inspect_json(container: &Container) -> serde_json::Value {
    let networks: serde_json::Map<String, serde_json::Value> = container
        .networks
        .iter()
        .map(|(network, aliases)| (network.clone(), json!({ "Aliases": aliases })))
        .collect();
    let mut state = json!({
        "Running": container.running,
        "Status": if container.running { "running" } else { "exited" },
    });
    if container.has_healthcheck {
        state["Health"] = json!({ "Status": "healthy" });
    }
    json!([{
        "Id": container.id,
        "Name": format!("/{}", container.name),
        "Image": container.image_id,
        "State": state,
        "Config": {
            "Image": container.image_ref,
            "Env": container.env,
            "Labels": container.labels,
        },
        "HostConfig": { "Binds": container.binds },
        "NetworkSettings": { "Networks": networks },
    }])
}

fn docker(state: &mut State, line: &str, args: &[&str]) -> Result<String, ExecError> {
    match args {
        ["pull", image] => match state.registry.get(*image).cloned() {
            Some(id) => {
                state.pulled.insert(image.to_string(), id);
                Ok(format!("Status: Image is up to date for {image}"))
            }
            None => Err(failed(line, format!("manifest for {image} not found"))),
        },
        ["image", "inspect", "--format={{.Id}}", image] => state
            .pulled
            .get(*image)
            .cloned()
            .ok_or_else(|| failed(line, format!("No such image: {image}"))),
        ["network", "ls", "--format", "{{.Name}}"] => {
            Ok(state.networks.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
        ["network", "create", network] => {
            if !state.networks.insert(network.to_string()) {
                return Err(failed(line, format!("network with name {network} already exists")));
            }
            Ok(format!("{network}-id"))
        }
        ["network", "connect", "--alias", alias, network, target] => {
            let alias = alias.to_string();
            let network = network.to_string();
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            if container.networks.contains_key(&network) {
                return Err(failed(line, "endpoint already exists in network"));
            }
            container.networks.insert(network, vec![alias]);
            Ok(String::new())
        }
        ["network", "disconnect", network, target] => {
            let network = network.to_string();
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            container
                .networks
                .remove(&network)
                .map(|_| String::new())
                .ok_or_else(|| failed(line, "container is not connected to the network"))
        }
        ["volume", "inspect", volume] => {
            if state.volumes.contains(*volume) {
                Ok(format!("[{{\"Name\": \"{volume}\"}}]"))
            } else {
                Err(failed(line, format!("no such volume: {volume}")))
            }
        }
        ["volume", "create", volume] => {
            state.volumes.insert(volume.to_string());
            Ok(volume.to_string())
        }
        ["ps", "-aq", "--filter", filter] => {
            let ids: Vec<String> = if let Some(network) = filter.strip_prefix("network=") {
                state
                    .containers
                    .iter()
                    .filter(|c| c.networks.contains_key(network))
                    .map(|c| c.id.clone())
                    .collect()
            } else if let Some(pattern) = filter.strip_prefix("name=") {
                let name = pattern.trim_start_matches('^').trim_end_matches('$');
                state
                    .containers
                    .iter()
                    .filter(|c| c.name == name)
                    .map(|c| c.id.clone())
                    .collect()
            } else {
                return Err(failed(line, "unsupported filter"));
            };
            Ok(ids.join("\n"))
        }
        ["inspect", "--type=container", target] => {
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            Ok(inspect_json(container).to_string())
        }
        ["inspect", "--format={{json .State.Health.Status}}", target] => {
            let unhealthy = state.unhealthy.clone();
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            if !container.has_healthcheck {
                return Err(failed(line, "map has no entry for key \"Health\""));
            }
            if unhealthy.contains(&container.image_id) {
                Ok("\"starting\"".to_string())
            } else {
                Ok("\"healthy\"".to_string())
            }
        }
        ["run", rest @ ..] => run(state, line, rest),
        ["exec", target, command @ ..] => {
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            if !container.running {
                return Err(failed(line, format!("container {target} is not running")));
            }
            match command {
                ["nginx", "-s", "reload"] => Ok(String::new()),
                _ => Err(failed(line, "executable file not found")),
            }
        }
        ["stop", target] => {
            let container = find(state, target).ok_or_else(|| failed(line, "No such container"))?;
            container.running = false;
            Ok(target.to_string())
        }
        ["rm", "-f", target] => remove(state, line, target),
        ["rm", target] => {
            let running = find(state, target)
                .ok_or_else(|| failed(line, "No such container"))?
                .running;
            if running {
                return Err(failed(line, "cannot remove a running container"));
            }
            remove(state, line, target)
        }
        ["rename", from, to] => {
            if state.containers.iter().any(|c| c.name == *to) {
                return Err(failed(line, format!("name {to} is already in use")));
            }
            let to = to.to_string();
            let container = find(state, from).ok_or_else(|| failed(line, "No such container"))?;
            container.name = to;
            Ok(String::new())
        }
        _ => Err(failed(line, "unsupported docker command")),
    }
}

fn remove(state: &mut State, line: &str, target: &str) -> Result<String, ExecError> {
    let before = state.containers.len();
    state.containers.retain(|c| c.id != target && c.name != target);
    if state.containers.len() == before {
        return Err(failed(line, format!("No such container: {target}")));
    }
    Ok(target.to_string())
}

fn run(state: &mut State, line: &str, args: &[&str]) -> Result<String, ExecError> {
    let mut container = Container {
        running: true,
        ..Default::default()
    };
    let mut network = None;
    let mut alias = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .map(|v| v.to_string())
                .ok_or_else(|| failed(line, format!("flag needs an argument: {arg}")))
        };
        match *arg {
            "-d" => {}
            "--name" => container.name = value()?,
            "--network" => network = Some(value()?),
            "--network-alias" => alias = Some(value()?),
            "-e" => container.env.push(value()?),
            "-v" => container.binds.push(value()?),
            "-p" => container.forwards.push(value()?),
            "--label" => {
                let label = value()?;
                let (key, val) = label.split_once('=').unwrap_or((label.as_str(), ""));
                container.labels.insert(key.to_string(), val.to_string());
            }
            "--health-cmd" => {
                value()?;
                container.has_healthcheck = true;
            }
            "--health-interval" | "--health-retries" | "--health-timeout" => {
                value()?;
            }
            image => container.image_ref = image.to_string(),
        }
    }

    if state.containers.iter().any(|c| c.name == container.name) {
        return Err(failed(
            line,
            format!("Conflict. The container name \"/{}\" is already in use", container.name),
        ));
    }
    container.image_id = state
        .pulled
        .get(&container.image_ref)
        .cloned()
        .ok_or_else(|| failed(line, format!("Unable to find image '{}'", container.image_ref)))?;
    let network = network.ok_or_else(|| failed(line, "no network"))?;
    if !state.networks.contains(&network) {
        return Err(failed(line, format!("network {network} not found")));
    }
    for volume in &container.binds {
        let source = volume.split(':').next().unwrap_or_default();
        if !source.starts_with('/') && !source.starts_with('.') && !state.volumes.contains(source) {
            // the runtime creates missing named volumes implicitly
            state.volumes.insert(source.to_string());
        }
    }
    container
        .networks
        .insert(network, alias.into_iter().collect());

    state.next_id += 1;
    container.id = format!("{:064x}", state.next_id);
    let id = container.id.clone();

    let taken: HashSet<String> = state
        .containers
        .iter()
        .filter(|c| c.running)
        .flat_map(|c| c.forwards.iter().map(|f| f.split(':').next().unwrap_or_default().to_string()))
        .collect();
    let conflict = container
        .forwards
        .iter()
        .map(|f| f.split(':').next().unwrap_or_default().to_string())
        .find(|port| taken.contains(port));
    if let Some(port) = conflict {
        // created, but failed to start
        container.running = false;
        state.containers.push(container);
        return Err(failed(
            line,
            format!("Bind for 0.0.0.0:{port} failed: port is already allocated"),
        ));
    }

    state.containers.push(container);
    Ok(id)
}

impl Executor for FakeRuntime {
    fn run<'a>(&'a self, command: &'a str, args: &'a [String]) -> BoxFuture<'a, Result<Vec<u8>, ExecError>> {
        let result = self.handle(command, args);
        async move { result }.boxed()
    }

    fn copy_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        let result = std::fs::read_to_string(local)
            .map(|contents| {
                let mut state = self.state.lock().unwrap();
                state.log.push(format!("copy {remote}"));
                state.files.insert(remote.to_string(), contents.trim().to_string());
                state.copied.push((remote.to_string(), contents));
            })
            .map_err(ExecError::Io);
        async move { result }.boxed()
    }
}
