//! Local commits and push over git smart HTTP
//!
//! The working copy is handled by `git2`. Pushing speaks the receive-pack
//! side of the smart HTTP protocol directly so that every request goes
//! through a [`RequestExecutor`], normally a git-strategy transport that adds
//! `x-access-token` basic credentials.
//!
//! # Packet-line format
//!
//! Each packet line is prefixed with a 4-character hex length that includes
//! itself. `0000` is a flush packet.

use crate::executor::RequestExecutor;
use anyhow::{anyhow, bail, Context, Result};
use git2::{ErrorCode, Oid, Repository, Signature};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, trace};

const RECEIVE_PACK: &str = "git-receive-pack";
const AGENT: &str = concat!("agent=github-app-bot/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Packet lines
// ---------------------------------------------------------------------------

/// A single packet line of the v0/v1 protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    Flush,
}

/// Encode `data` with its 4-hex-digit length prefix
pub fn encode_pkt_line(data: &[u8]) -> Result<Vec<u8>> {
    let total_len = data.len() + 4;
    if total_len > 0xFFFF {
        bail!("packet-line data too large ({} bytes)", total_len);
    }
    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(format!("{total_len:04x}").as_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

/// Decode packet lines until `data` is exhausted or a pack starts
///
/// Returns the packets and the offset of the first unconsumed byte.
pub fn decode_pkt_lines(data: &[u8]) -> Result<(Vec<PktLine>, usize)> {
    let mut packets = Vec::new();
    let mut pos = 0;

    while pos + 4 <= data.len() {
        let prefix = &data[pos..pos + 4];
        if prefix == b"PACK" {
            break;
        }
        let len_hex = std::str::from_utf8(prefix)
            .map_err(|_| anyhow!("non-UTF-8 packet-line length at offset {}", pos))?;
        let pkt_len = usize::from_str_radix(len_hex, 16)
            .map_err(|_| anyhow!("invalid packet-line length {:?} at offset {}", len_hex, pos))?;

        match pkt_len {
            0 => {
                trace!(offset = pos, "flush packet");
                packets.push(PktLine::Flush);
                pos += 4;
            }
            1..=3 => bail!("unexpected packet-line length {} at offset {}", pkt_len, pos),
            n => {
                if pos + n > data.len() {
                    bail!(
                        "truncated packet-line at offset {} (declared {}, available {})",
                        pos,
                        n,
                        data.len() - pos
                    );
                }
                packets.push(PktLine::Data(data[pos + 4..pos + n].to_vec()));
                pos += n;
            }
        }
    }

    Ok((packets, pos))
}

fn data_line(pkt: &PktLine) -> Option<String> {
    match pkt {
        PktLine::Data(data) => Some(
            String::from_utf8_lossy(data)
                .trim_end_matches('\n')
                .to_string(),
        ),
        PktLine::Flush => None,
    }
}

// ---------------------------------------------------------------------------
// Protocol messages
// ---------------------------------------------------------------------------

/// Refs and capabilities advertised by `info/refs?service=git-receive-pack`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    pub refs: HashMap<String, Oid>,
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (packets, _) = decode_pkt_lines(body)?;
        let mut advertisement = RefAdvertisement::default();
        let mut first_ref = true;

        for line in packets.iter().filter_map(data_line) {
            if line.starts_with("# service=") {
                continue;
            }

            let (ref_part, caps) = match line.split_once('\0') {
                Some((r, c)) => (r, Some(c)),
                None => (line.as_str(), None),
            };
            if first_ref {
                if let Some(caps) = caps {
                    advertisement.capabilities =
                        caps.split_whitespace().map(str::to_string).collect();
                }
                first_ref = false;
            }

            let (oid, name) = ref_part
                .split_once(' ')
                .with_context(|| format!("malformed ref advertisement line: {:?}", ref_part))?;
            // Empty repositories advertise only their capabilities
            if name == "capabilities^{}" {
                continue;
            }
            let oid = Oid::from_str(oid)
                .with_context(|| format!("invalid object id in advertisement: {}", oid))?;
            advertisement.refs.insert(name.to_string(), oid);
        }

        Ok(advertisement)
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// One ref update sent to receive-pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: String,
    pub old: Oid,
    pub new: Oid,
}

impl RefUpdate {
    /// Command section of the receive-pack request, terminated by a flush
    pub fn encode_command(&self) -> Result<Vec<u8>> {
        let line = format!(
            "{} {} {}\0report-status {}\n",
            self.old, self.new, self.refname, AGENT
        );
        let mut buf = encode_pkt_line(line.as_bytes())?;
        buf.extend_from_slice(b"0000");
        Ok(buf)
    }
}

/// Check a `report-status` reply for `unpack ok` and `ok <refname>`
pub fn check_report_status(body: &[u8], refname: &str) -> Result<()> {
    let (packets, _) = decode_pkt_lines(body)?;
    let mut lines = packets.iter().filter_map(data_line);

    match lines.next() {
        Some(line) if line == "unpack ok" => {}
        Some(line) => bail!("remote failed to unpack: {}", line),
        None => bail!("empty report-status from remote"),
    }

    for line in lines {
        if line == format!("ok {}", refname) {
            return Ok(());
        }
        if let Some(reason) = line.strip_prefix(&format!("ng {} ", refname)) {
            bail!("remote rejected {}: {}", refname, reason);
        }
    }

    bail!("remote did not report status for {}", refname)
}

// ---------------------------------------------------------------------------
// Local repository
// ---------------------------------------------------------------------------

/// Commit author
#[derive(Debug, Clone)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Non-bare repository on local disk
pub struct LocalRepository {
    repo: Repository,
}

impl LocalRepository {
    /// Initialise (or reopen) a repository at `path`
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)
            .with_context(|| format!("Failed to init git repo at {:?}", path))?;
        Ok(Self { repo })
    }

    /// Write `contents` to `file_name` in the working tree and stage it
    pub fn write_and_stage(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        let workdir = self
            .repo
            .workdir()
            .context("Repository has no working directory")?;
        std::fs::write(workdir.join(file_name), contents)
            .with_context(|| format!("Failed to write {}", file_name))?;

        let mut index = self.repo.index()?;
        index
            .add_path(Path::new(file_name))
            .with_context(|| format!("Failed to add {}", file_name))?;
        index.write()?;
        Ok(())
    }

    /// Commit the index on top of HEAD (if any)
    pub fn commit(&self, message: &str, author: &CommitAuthor) -> Result<Oid> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now(&author.name, &author.email)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                None
            }
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<_> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .context("Failed to commit")?;

        debug!(commit = %oid, "Created commit");
        Ok(oid)
    }

    /// Full name and target of HEAD
    pub fn head(&self) -> Result<(String, Oid)> {
        let head = self.repo.head().context("Repository has no HEAD")?;
        let name = head.name().context("HEAD is not a named reference")?.to_string();
        let oid = head.target().context("HEAD has no target")?;
        Ok((name, oid))
    }

    /// Pack of everything reachable from `new` that `remote_has` lacks
    pub fn pack_since(&self, new: Oid, remote_has: Option<Oid>) -> Result<Vec<u8>> {
        let mut walk = self.repo.revwalk()?;
        walk.push(new)?;
        if let Some(old) = remote_has {
            if self.repo.find_commit(old).is_ok() {
                walk.hide(old)?;
            }
        }

        let mut builder = self.repo.packbuilder()?;
        builder.insert_walk(&mut walk)?;
        let mut buf = git2::Buf::new();
        builder.write_buf(&mut buf)?;
        debug!(objects = builder.object_count(), bytes = buf.len(), "Built pack");
        Ok(buf.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Smart HTTP push
// ---------------------------------------------------------------------------

/// Pushes over smart HTTP through an executor
pub struct SmartHttpPusher<E> {
    executor: E,
}

impl<E: RequestExecutor> SmartHttpPusher<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    fn service_url(remote: &str, suffix: &str) -> Result<Url> {
        let base = remote.trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, suffix))
            .with_context(|| format!("Invalid remote URL: {}", remote))
    }

    /// Fetch the receive-pack ref advertisement
    pub async fn advertised_refs(&self, remote: &str) -> Result<RefAdvertisement> {
        let url = Self::service_url(remote, "info/refs?service=git-receive-pack")?;
        let response = self
            .executor
            .execute(Request::new(Method::GET, url))
            .await
            .context("Failed to fetch ref advertisement")?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            bail!(
                "ref advertisement failed ({}): {}",
                status,
                String::from_utf8_lossy(&body)
            );
        }

        RefAdvertisement::parse(&body)
    }

    /// Send one ref update plus its pack and check the report
    pub async fn send_pack(&self, remote: &str, update: &RefUpdate, pack: Vec<u8>) -> Result<()> {
        let url = Self::service_url(remote, RECEIVE_PACK)?;

        let mut body = update.encode_command()?;
        body.extend_from_slice(&pack);

        let mut request = Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-git-receive-pack-request"),
        );
        request.headers_mut().insert(
            ACCEPT,
            HeaderValue::from_static("application/x-git-receive-pack-result"),
        );
        *request.body_mut() = Some(body.into());

        let response = self
            .executor
            .execute(request)
            .await
            .context("Failed to send pack")?;

        let status = response.status();
        let reply = response.bytes().await?;
        if !status.is_success() {
            bail!(
                "receive-pack failed ({}): {}",
                status,
                String::from_utf8_lossy(&reply)
            );
        }

        check_report_status(&reply, &update.refname)
    }

    /// Push the current HEAD branch of `repo` to `remote`
    pub async fn push_head(&self, repo: &LocalRepository, remote: &str) -> Result<()> {
        let (refname, new) = repo.head()?;
        let advertisement = self.advertised_refs(remote).await?;

        if !advertisement.supports("report-status") {
            bail!("remote does not support report-status");
        }

        let remote_has = advertisement.refs.get(&refname).copied();
        if remote_has == Some(new) {
            info!(refname = %refname, "Remote already up to date");
            return Ok(());
        }

        let pack = repo.pack_since(new, remote_has)?;
        let update = RefUpdate {
            refname: refname.clone(),
            old: remote_has.unwrap_or_else(Oid::zero),
            new,
        };

        self.send_pack(remote, &update, pack).await?;
        info!(refname = %refname, commit = %new, "Pushed");
        Ok(())
    }
}
