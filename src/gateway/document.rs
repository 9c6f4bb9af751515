//! Gateway Config Document
//!
//! Structural model of the gateway's WireGuard configuration file: one
//! `[Interface]` section followed by an ordered list of `[Peer]` blocks.
//!
//! A peer block starts at its leading comment lines (the first one names the
//! client) and ends at its last field line. Comment lines that are not
//! followed by a field in the same section belong to the next section
//! header, so every block is a contiguous region of the file that can be
//! dropped as a unit. The file itself is only ever produced by [`render`],
//! never edited in place.
//!
//! [`render`]: ConfigDocument::render

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::keys;

use super::identity::GatewayIdentity;

const INTERFACE: &str = "Interface";
const PEER: &str = "Peer";
const ADDRESS: &str = "Address";
const PRIVATE_KEY: &str = "PrivateKey";
const LISTEN_PORT: &str = "ListenPort";
const PUBLIC_KEY: &str = "PublicKey";
const ALLOWED_IPS: &str = "AllowedIPs";

/// A line inside a section body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `Key = Value`
    Field { key: String, value: String },
    /// `# text`
    Comment(String),
}

impl Line {
    fn field(key: &str, value: impl Into<String>) -> Self {
        Line::Field {
            key: key.to_string(),
            value: value.into(),
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Line::Field { key, value } => {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
            Line::Comment(text) => write_comment(out, text),
        }
    }
}

/// The `[Interface]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSection {
    comments: Vec<String>,
    body: Vec<Line>,
    listen_port: u16,
}

impl InterfaceSection {
    pub fn new(address: &str, private_key: &str, listen_port: u16) -> Self {
        Self {
            comments: Vec::new(),
            body: vec![
                Line::field(ADDRESS, address),
                Line::field(PRIVATE_KEY, private_key),
                Line::field(LISTEN_PORT, listen_port.to_string()),
            ],
            listen_port,
        }
    }

    pub fn address(&self) -> &str {
        field_value(&self.body, ADDRESS).unwrap_or_default()
    }

    pub fn private_key(&self) -> &str {
        field_value(&self.body, PRIVATE_KEY).unwrap_or_default()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    fn write_to(&self, out: &mut String) {
        write_section(out, &self.comments, INTERFACE, &self.body);
    }
}

/// One `[Peer]` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlock {
    comments: Vec<String>,
    body: Vec<Line>,
}

impl PeerBlock {
    pub fn new(name: &str, public_key: &str, allowed_ips: &str) -> Self {
        Self {
            comments: vec![name.to_string()],
            body: vec![
                Line::field(PUBLIC_KEY, public_key),
                Line::field(ALLOWED_IPS, allowed_ips),
            ],
        }
    }

    /// Client name, taken from the first leading comment
    pub fn name(&self) -> Option<&str> {
        self.comments.first().map(String::as_str)
    }

    pub fn public_key(&self) -> &str {
        field_value(&self.body, PUBLIC_KEY).unwrap_or_default()
    }

    pub fn allowed_ips(&self) -> &str {
        field_value(&self.body, ALLOWED_IPS).unwrap_or_default()
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Serialized form of this block alone
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        write_section(out, &self.comments, PEER, &self.body);
    }
}

/// Result of [`ConfigDocument::load`]
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(ConfigDocument),
    /// No file yet; the caller must build one from a [`GatewayIdentity`]
    CreateDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// In-memory gateway configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    interface: InterfaceSection,
    peers: Vec<PeerBlock>,
    /// Comments after the last field of the file
    trailing: Vec<String>,
}

impl ConfigDocument {
    /// Create a document with no peers
    pub fn new(interface: InterfaceSection) -> Self {
        Self {
            interface,
            peers: Vec::new(),
            trailing: Vec::new(),
        }
    }

    /// Create the initial document for a gateway
    pub fn for_gateway(gateway: &GatewayIdentity) -> Self {
        Self::new(InterfaceSection::new(
            gateway.address(),
            &gateway.key_pair().private_key_base64(),
            gateway.listen_port(),
        ))
    }

    /// Load the config file, or signal that it does not exist yet
    pub fn load(path: &Path) -> Result<LoadOutcome> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(LoadOutcome::Loaded(Self::parse(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LoadOutcome::CreateDefault),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(Error::malformed(1, "file is not valid UTF-8"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse config text into sections
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: Vec<RawSection> = Vec::new();
        let mut current: Option<RawSection> = None;
        let mut pending: Vec<String> = Vec::new();

        // Editors on Windows like to prepend one
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                pending.push(comment.trim().to_string());
                continue;
            }

            if line.starts_with('[') {
                let name = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .map(str::trim)
                    .ok_or_else(|| Error::malformed(line_no, "unterminated section header"))?;
                let kind = if name.eq_ignore_ascii_case(INTERFACE) {
                    SectionKind::Interface
                } else if name.eq_ignore_ascii_case(PEER) {
                    SectionKind::Peer
                } else {
                    return Err(Error::malformed(line_no, format!("unknown section [{}]", name)));
                };
                if let Some(done) = current.take() {
                    sections.push(done);
                }
                current = Some(RawSection {
                    kind,
                    header_line: line_no,
                    comments: std::mem::take(&mut pending),
                    body: Vec::new(),
                });
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| is_field_key(k))
                .ok_or_else(|| Error::malformed(line_no, "expected `Key = Value`"))?;
            let section = current
                .as_mut()
                .ok_or_else(|| Error::malformed(line_no, "field outside of any section"))?;
            section
                .body
                .extend(pending.drain(..).map(|c| (line_no, Line::Comment(c))));
            section.body.push((line_no, Line::field(key, value)));
        }
        if let Some(done) = current.take() {
            sections.push(done);
        }

        let mut interface: Option<InterfaceSection> = None;
        let mut peers: Vec<PeerBlock> = Vec::new();
        for section in sections {
            match section.kind {
                SectionKind::Interface => {
                    if interface.is_some() {
                        return Err(Error::malformed(
                            section.header_line,
                            "duplicate [Interface] section",
                        ));
                    }
                    interface = Some(section.into_interface()?);
                }
                SectionKind::Peer => {
                    let header_line = section.header_line;
                    let peer = section.into_peer()?;
                    if peers.iter().any(|p| p.public_key() == peer.public_key()) {
                        return Err(Error::malformed(
                            header_line,
                            format!("duplicate peer PublicKey {}", peer.public_key()),
                        ));
                    }
                    peers.push(peer);
                }
            }
        }

        let interface = interface.ok_or_else(|| {
            Error::malformed(text.lines().count().max(1), "missing [Interface] section")
        })?;

        Ok(Self {
            interface,
            peers,
            trailing: pending,
        })
    }

    /// Serialize the document
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.interface.write_to(&mut out);
        for peer in &self.peers {
            out.push('\n');
            peer.write_to(&mut out);
        }
        if !self.trailing.is_empty() {
            out.push('\n');
            for comment in &self.trailing {
                write_comment(&mut out, comment);
            }
        }
        out
    }

    /// Write the rendered document, replacing the file atomically.
    ///
    /// The caller holds the [`GatewayLock`](super::GatewayLock) for `path`;
    /// the temporary file name is shared by all writers of that path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        // Left over from a crash; may carry looser permissions
        match std::fs::remove_file(&tmp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        // Holds the gateway private key
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(self.render().as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, path)?;
        #[cfg(unix)]
        std::fs::File::open(dir)?.sync_all()?;
        Ok(())
    }

    /// Append a peer unless a block with this public key already exists
    pub fn append_peer(&mut self, name: &str, public_key: &str, allowed_ips: &str) -> AppendOutcome {
        if self.find_peer(public_key).is_some() {
            return AppendOutcome::AlreadyPresent;
        }
        self.peers.push(PeerBlock::new(name, public_key, allowed_ips));
        AppendOutcome::Added
    }

    /// Remove the block carrying this public key
    pub fn remove_peer(&mut self, public_key: &str) -> RemoveOutcome {
        match self.peers.iter().position(|p| p.public_key() == public_key) {
            Some(idx) => {
                self.peers.remove(idx);
                RemoveOutcome::Removed
            }
            None => RemoveOutcome::NotFound,
        }
    }

    pub fn find_peer(&self, public_key: &str) -> Option<&PeerBlock> {
        self.peers.iter().find(|p| p.public_key() == public_key)
    }

    pub fn interface(&self) -> &InterfaceSection {
        &self.interface
    }

    pub fn peers(&self) -> &[PeerBlock] {
        &self.peers
    }
}

#[derive(Debug, Clone, Copy)]
enum SectionKind {
    Interface,
    Peer,
}

/// Section as read from the file, before required fields are checked
struct RawSection {
    kind: SectionKind,
    header_line: usize,
    comments: Vec<String>,
    body: Vec<(usize, Line)>,
}

impl RawSection {
    fn into_interface(self) -> Result<InterfaceSection> {
        self.check_unique(&[ADDRESS, PRIVATE_KEY, LISTEN_PORT])?;
        let (port_line, port) = self.required(LISTEN_PORT)?;
        let listen_port = port
            .parse::<u16>()
            .map_err(|_| Error::malformed(port_line, format!("invalid ListenPort {:?}", port)))?;
        self.required(ADDRESS)?;
        let (key_line, key) = self.required(PRIVATE_KEY)?;
        keys::parse_key(key)
            .map_err(|e| Error::malformed(key_line, format!("invalid PrivateKey: {}", e)))?;

        Ok(InterfaceSection {
            comments: self.comments,
            body: self.body.into_iter().map(|(_, l)| l).collect(),
            listen_port,
        })
    }

    fn into_peer(self) -> Result<PeerBlock> {
        self.check_unique(&[PUBLIC_KEY, ALLOWED_IPS])?;
        self.required(PUBLIC_KEY)?;
        self.required(ALLOWED_IPS)?;

        Ok(PeerBlock {
            comments: self.comments,
            body: self.body.into_iter().map(|(_, l)| l).collect(),
        })
    }

    fn required(&self, key: &str) -> Result<(usize, &str)> {
        self.body
            .iter()
            .find_map(|(n, l)| match l {
                Line::Field { key: k, value } if k.eq_ignore_ascii_case(key) => {
                    Some((*n, value.as_str()))
                }
                _ => None,
            })
            .filter(|(_, v)| !v.is_empty())
            .ok_or_else(|| {
                Error::malformed(
                    self.header_line,
                    format!("[{}] is missing {}", self.kind_name(), key),
                )
            })
    }

    fn check_unique(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            let mut seen = false;
            for (n, line) in &self.body {
                if let Line::Field { key: k, .. } = line {
                    if k.eq_ignore_ascii_case(key) {
                        if seen {
                            return Err(Error::malformed(*n, format!("{} given twice", key)));
                        }
                        seen = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            SectionKind::Interface => INTERFACE,
            SectionKind::Peer => PEER,
        }
    }
}

fn field_value<'a>(body: &'a [Line], key: &str) -> Option<&'a str> {
    body.iter().find_map(|l| match l {
        Line::Field { key: k, value } if k.eq_ignore_ascii_case(key) => Some(value.as_str()),
        _ => None,
    })
}

fn is_field_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn write_section(out: &mut String, comments: &[String], header: &str, body: &[Line]) {
    for comment in comments {
        write_comment(out, comment);
    }
    out.push('[');
    out.push_str(header);
    out.push_str("]\n");
    for line in body {
        line.write_to(out);
    }
}

fn write_comment(out: &mut String, text: &str) {
    // A line break here would split the comment into a stray line
    let text = text.replace(['\r', '\n'], " ");
    if text.is_empty() {
        out.push_str("#\n");
    } else {
        out.push_str("# ");
        out.push_str(&text);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GW_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const ALICE: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const BOB: &str = "TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=";
    const CAROL: &str = "gN65BkIKy1eCE9pP1wdc8ROUtkHLF2PfAqYdyYBz6EA=";

    fn doc() -> ConfigDocument {
        ConfigDocument::new(InterfaceSection::new("10.8.0.1/24", GW_KEY, 51820))
    }

    #[test]
    fn test_render_layout() {
        let mut d = doc();
        d.append_peer("alice", ALICE, "10.8.0.2/32");

        let expected = format!(
            "[Interface]\nAddress = 10.8.0.1/24\nPrivateKey = {}\nListenPort = 51820\n\n\
             # alice\n[Peer]\nPublicKey = {}\nAllowedIPs = 10.8.0.2/32\n",
            GW_KEY, ALICE
        );
        assert_eq!(d.render(), expected);
    }

    #[test]
    fn test_round_trip_through_mutations() {
        let mut d = doc();
        assert_eq!(ConfigDocument::parse(&d.render()).unwrap(), d);

        d.append_peer("alice", ALICE, "10.8.0.2/32");
        d.append_peer("bob", BOB, "10.8.0.3/32");
        assert_eq!(ConfigDocument::parse(&d.render()).unwrap(), d);

        d.remove_peer(ALICE);
        d.append_peer("carol", CAROL, "10.8.0.4/32");
        let parsed = ConfigDocument::parse(&d.render()).unwrap();
        assert_eq!(parsed, d);
        let names: Vec<_> = parsed.peers().iter().filter_map(PeerBlock::name).collect();
        assert_eq!(names, vec!["bob", "carol"]);
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut d = doc();
        assert_eq!(d.append_peer("alice", ALICE, "10.8.0.2/32"), AppendOutcome::Added);
        assert_eq!(
            d.append_peer("alice-again", ALICE, "10.8.0.9/32"),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(d.peers().len(), 1);
        assert_eq!(d.peers()[0].allowed_ips(), "10.8.0.2/32");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut d = doc();
        d.append_peer("alice", ALICE, "10.8.0.2/32");
        assert_eq!(d.remove_peer(ALICE), RemoveOutcome::Removed);
        assert_eq!(d.remove_peer(ALICE), RemoveOutcome::NotFound);
        assert!(d.peers().is_empty());
    }

    #[test]
    fn test_remove_leaves_other_blocks_untouched() {
        let mut d = doc();
        d.append_peer("alice", ALICE, "10.8.0.2/32");
        d.append_peer("bob", BOB, "10.8.0.3/32");
        d.append_peer("carol", CAROL, "10.8.0.4/32");
        let before: Vec<String> = d
            .peers()
            .iter()
            .filter(|p| p.public_key() != BOB)
            .map(PeerBlock::render)
            .collect();

        d.remove_peer(BOB);

        let after: Vec<String> = d.peers().iter().map(PeerBlock::render).collect();
        assert_eq!(before, after);
        let text = d.render();
        assert!(!text.contains(BOB));
        assert!(!text.contains("# bob"));
        assert!(text.contains(&before[0]));
        assert!(text.contains(&before[1]));
    }

    #[test]
    fn test_irregular_formatting_removal() {
        // Extra blank lines, reordered fields, an extra field and a note
        // inside a block: none of it may leak into a neighbour on removal.
        let text = format!(
            "# gateway\n[Interface]\nPrivateKey={gw}\nListenPort = 51820\nAddress = 10.8.0.1/24\n\
             \n\n\n# alice\n\n[Peer]\nAllowedIPs = 10.8.0.2/32\n# laptop\nPublicKey = {a}\n\
             PersistentKeepalive = 25\n# bob\n[peer]\npublickey = {b}\nallowedips = 10.8.0.3/32\n\
             \n\n# carol\n# added by hand\n[Peer]\nPublicKey = {c}\n\nAllowedIPs = 10.8.0.4/32\n",
            gw = GW_KEY,
            a = ALICE,
            b = BOB,
            c = CAROL
        );
        let mut d = ConfigDocument::parse(&text).unwrap();
        assert_eq!(d.interface().listen_port(), 51820);
        assert_eq!(d.interface().address(), "10.8.0.1/24");
        assert_eq!(d.interface().comments(), ["gateway"]);
        let names: Vec<_> = d.peers().iter().filter_map(PeerBlock::name).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(d.peers()[1].allowed_ips(), "10.8.0.3/32");
        assert_eq!(d.peers()[2].comments(), ["carol", "added by hand"]);

        let bob_block = d.find_peer(BOB).unwrap().render();
        let carol_block = d.find_peer(CAROL).unwrap().render();

        assert_eq!(d.remove_peer(ALICE), RemoveOutcome::Removed);

        let rendered = d.render();
        assert!(!rendered.contains(ALICE));
        assert!(!rendered.contains("PersistentKeepalive"));
        assert!(!rendered.contains("laptop"));
        assert!(rendered.contains(&bob_block));
        assert!(rendered.contains(&carol_block));
        assert_eq!(ConfigDocument::parse(&rendered).unwrap(), d);
    }

    #[test]
    fn test_extra_fields_survive_round_trip() {
        let text = format!(
            "[Interface]\nAddress = 10.8.0.1/24\nPrivateKey = {}\nListenPort = 51820\n\
             PostUp = iptables -A FORWARD -i wg0 -j ACCEPT\n\n\
             # alice\n[Peer]\nPublicKey = {}\nAllowedIPs = 10.8.0.2/32\nPersistentKeepalive = 25\n\n\
             # end of peers\n",
            GW_KEY, ALICE
        );
        let d = ConfigDocument::parse(&text).unwrap();
        assert_eq!(d.render(), text);
    }

    #[test]
    fn test_base64_padding_kept_in_values() {
        let d = ConfigDocument::parse(&format!(
            "[Interface]\nAddress=10.8.0.1/24\nPrivateKey={}\nListenPort=51820\n",
            GW_KEY
        ))
        .unwrap();
        assert_eq!(d.interface().private_key(), GW_KEY);
    }

    #[test]
    fn test_malformed_inputs() {
        let iface = format!("[Interface]\nAddress = a\nPrivateKey = {}\n", GW_KEY);
        let cases = [
            ("Address = 10.8.0.1/24\n[Interface]\n".to_string(), 1),
            ("[Interface]\nAddress = 10.8.0.1/24\nnonsense\n".to_string(), 3),
            ("[Interface\n".to_string(), 1),
            (format!("{}ListenPort = 51820\n[Bogus]\n", iface), 5),
            (format!("{}ListenPort = 99999\n", iface), 4),
            (iface.clone(), 1),
            ("[Interface]\nAddress = a\nAddress = c\nPrivateKey = b\nListenPort = 1\n".to_string(), 3),
            ("[Peer]\nPublicKey = x\nAllowedIPs = 10.8.0.2/32\n".to_string(), 3),
            ("[Interface]\nListenPort = 1\nAddress = a\n\n# gw\nPrivateKey = short\n".to_string(), 6),
            (format!("{0}ListenPort = 1\n{0}ListenPort = 1\n", iface), 5),
            (format!("{}ListenPort = 1\n[Peer]\nAllowedIPs = 10.8.0.2/32\n", iface), 5),
            (
                format!(
                    "{}ListenPort = 1\n\
                     [Peer]\nPublicKey = k\nAllowedIPs = 10.8.0.2/32\n\
                     [Peer]\nPublicKey = k\nAllowedIPs = 10.8.0.3/32\n",
                    iface
                ),
                8,
            ),
        ];
        for (text, expected_line) in cases {
            match ConfigDocument::parse(&text) {
                Err(Error::MalformedConfig { line, .. }) => {
                    assert_eq!(line, expected_line, "wrong line for {:?}", text)
                }
                other => panic!("expected MalformedConfig for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_leading_bom_ignored() {
        let text = format!(
            "\u{feff}[Interface]\nAddress = 10.8.0.1/24\nPrivateKey = {}\nListenPort = 51820\n",
            GW_KEY
        );
        let d = ConfigDocument::parse(&text).unwrap();
        assert_eq!(d.interface().address(), "10.8.0.1/24");
        assert!(!d.render().starts_with('\u{feff}'));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");
        std::fs::write(&path, b"[Interface]\nAddress = \xff\xfe\n").unwrap();

        assert!(matches!(
            ConfigDocument::load(&path),
            Err(Error::MalformedConfig { line: 1, .. })
        ));
    }

    #[test]
    fn test_save_replaces_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");
        let tmp = dir.path().join("wg0.conf.tmp");
        std::fs::write(&tmp, "half written").unwrap();

        doc().save(&path).unwrap();

        assert!(!tmp.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), doc().render());
    }

    #[test]
    fn test_load_missing_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wg0.conf");

        assert!(matches!(
            ConfigDocument::load(&path).unwrap(),
            LoadOutcome::CreateDefault
        ));

        let mut d = doc();
        d.append_peer("alice", ALICE, "10.8.0.2/32");
        d.save(&path).unwrap();

        match ConfigDocument::load(&path).unwrap() {
            LoadOutcome::Loaded(loaded) => assert_eq!(loaded, d),
            LoadOutcome::CreateDefault => panic!("file should exist"),
        }
        assert!(!dir.path().join("wg0.conf.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
