//! Implementations of the `ringctl` subcommands.
//!
//! Memory-backend commands read a serialized ring, apply the command and
//! (with `--output`) print the resulting ring; nothing is written back to the
//! input file. Persistent-backend commands open the store directory and
//! their mutations are durable.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{BackendChoice, Settings};
use ring::{parse_vnode_list, BackendConfig, CreateOptions, Ring};
use serde_json::Value;
use tracing::{debug, info};

use crate::RingArgs;

pub struct Runner {
    settings: Settings,
}

impl Runner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn backend_of(&self, args: &RingArgs) -> BackendChoice {
        args.backend.unwrap_or(self.settings.backend)
    }

    fn location_of<'a>(&'a self, args: &'a RingArgs) -> Option<&'a Path> {
        args.location
            .as_deref()
            .or(self.settings.location.as_deref())
    }

    /// Opens the ring named by `args`.
    fn open(&self, args: &RingArgs) -> Result<Ring> {
        self.open_at(self.backend_of(args), self.location_of(args))
    }

    fn open_at(&self, backend: BackendChoice, location: Option<&Path>) -> Result<Ring> {
        debug!(%backend, location = ?location, "opening ring");
        match backend {
            BackendChoice::Memory => {
                let text = read_topology(location)?;
                Ring::deserialize(BackendConfig::Memory, &text).context("unable to deserialize ring")
            }
            BackendChoice::Persistent => {
                let Some(location) = location else {
                    bail!("the persistent backend requires --location");
                };
                Ring::load(location, &self.settings.store)
                    .with_context(|| format!("unable to load ring from {}", location.display()))
            }
        }
    }

    /// Prints the ring when asked to, then releases it.
    fn finish(&self, mut ring: Ring, output: bool) -> Result<()> {
        if output {
            println!("{}", ring.serialize().context("unable to print hash")?);
        }
        ring.close()?;
        Ok(())
    }

    pub fn create(
        &self,
        vnodes: u32,
        pnodes: &[String],
        algorithm: Option<String>,
        args: &RingArgs,
        output: bool,
    ) -> Result<()> {
        let pnodes = split_pnodes(pnodes);
        let algorithm = algorithm.unwrap_or_else(|| self.settings.algorithm.clone());

        let backend = match self.backend_of(args) {
            BackendChoice::Memory => BackendConfig::Memory,
            BackendChoice::Persistent => {
                let Some(location) = self.location_of(args) else {
                    bail!("the persistent backend requires --location");
                };
                BackendConfig::Persistent {
                    location: location.to_path_buf(),
                    store: self.settings.store.clone(),
                }
            }
        };

        let ring = Ring::create(CreateOptions::new(algorithm, vnodes, pnodes).backend(backend))
            .context("unable to create ring")?;
        info!(vnodes, "created ring");
        self.finish(ring, output)
    }

    pub fn deserialize_ring(&self, location: &Path, file: Option<&Path>) -> Result<()> {
        let text = read_topology(file)?;
        let backend = BackendConfig::Persistent {
            location: location.to_path_buf(),
            store: self.settings.store.clone(),
        };
        let ring = Ring::deserialize(backend, &text)
            .with_context(|| format!("unable to store ring in {}", location.display()))?;
        self.finish(ring, false)
    }

    pub fn add_data(&self, vnodes: &str, data: Option<String>, args: &RingArgs, output: bool) -> Result<()> {
        let vnodes = parse_vnode_list(vnodes);
        let mut ring = self.open(args)?;
        ring.add_data_to_vnodes(&vnodes, data.map(Value::String))
            .context("unable to add data")?;
        self.finish(ring, output)
    }

    pub fn remap_vnode(&self, vnodes: &str, pnode: &str, args: &RingArgs, output: bool) -> Result<()> {
        let vnodes = parse_vnode_list(vnodes);
        if vnodes.is_empty() {
            bail!("no vnodes given");
        }
        let mut ring = self.open(args)?;
        ring.remap_vnodes(pnode, &vnodes)
            .with_context(|| format!("unable to remap vnodes to {}", pnode))?;
        self.finish(ring, output)
    }

    pub fn remove_pnode(&self, pnode: &str, args: &RingArgs, output: bool) -> Result<()> {
        let mut ring = self.open(args)?;
        ring.remove_pnode(pnode)
            .with_context(|| format!("unable to remove pnode {}", pnode))?;
        self.finish(ring, output)
    }

    pub fn get_pnodes(&self, args: &RingArgs) -> Result<()> {
        let ring = self.open(args)?;
        print_json(&ring.get_pnodes()?)?;
        self.finish(ring, false)
    }

    pub fn get_vnodes(&self, pnode: &str, args: &RingArgs) -> Result<()> {
        let ring = self.open(args)?;
        print_json(&ring.get_vnodes(pnode)?)?;
        self.finish(ring, false)
    }

    pub fn get_vnode_pnode_and_data(&self, vnodes: &str, args: &RingArgs) -> Result<()> {
        let vnodes = parse_vnode_list(vnodes);
        let ring = self.open(args)?;
        let entries: BTreeMap<u32, _> = ring
            .get_vnodes_pnode_and_data(&vnodes)
            .context("unable to get pnode and data")?
            .into_iter()
            .collect();
        print_json(&entries)?;
        self.finish(ring, false)
    }

    pub fn get_node(&self, key: &str, args: &RingArgs) -> Result<()> {
        let ring = self.open(args)?;
        print_json(&ring.get_node(key)?)?;
        self.finish(ring, false)
    }

    pub fn get_hashspace(&self, vnodes: &str, args: &RingArgs) -> Result<()> {
        let vnodes = parse_vnode_list(vnodes);
        let ring = self.open(args)?;
        let mut starts = BTreeMap::new();
        for vnode in vnodes {
            starts.insert(vnode, ring.hashspace(vnode)?);
        }
        print_json(&starts)?;
        self.finish(ring, false)
    }

    pub fn print_hash(&self, args: &RingArgs) -> Result<()> {
        let ring = self.open(args)?;
        self.finish(ring, true)
    }

    /// Diffs two rings. One `-b` applies to both inputs; a second `-b`
    /// overrides the backend of the second input.
    pub fn diff(&self, backends: &[BackendChoice], first: &str, second: &str) -> Result<()> {
        if first == "-" && second == "-" {
            bail!("only one input may be read from stdin");
        }
        let (b1, b2) = match backends {
            [] => (BackendChoice::Memory, BackendChoice::Memory),
            [b] => (*b, *b),
            [b1, b2] => (*b1, *b2),
            _ => bail!("-b may be given at most twice"),
        };

        let mut before = self.open_at(b1, input_path(first))?;
        let mut after = self.open_at(b2, input_path(second))?;
        let changes = ring::diff(&before, &after)?;
        if !changes.is_empty() {
            print_json(&changes)?;
        }
        before.close()?;
        after.close()?;
        Ok(())
    }
}

/// Splits `-p` values on commas and spaces, dropping empty names.
fn split_pnodes(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|s| s.split(|c: char| c == ',' || c == ' '))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn input_path(arg: &str) -> Option<&Path> {
    if arg == "-" {
        None
    } else {
        Some(Path::new(arg))
    }
}

/// Reads a serialized ring from `path`, or from stdin when `path` is
/// `None` or `-`.
fn read_topology(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => {
            fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))
        }
        _ => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("reading ring from stdin")?;
            Ok(text)
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnode_lists_split_on_commas_and_spaces() {
        let raw = vec!["A, B".to_string(), "C,,D".to_string(), " ".to_string()];
        assert_eq!(split_pnodes(&raw), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn dash_means_stdin() {
        assert_eq!(input_path("-"), None);
        assert_eq!(input_path("ring.json"), Some(Path::new("ring.json")));
    }
}
