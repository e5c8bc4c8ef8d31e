//! Bundle spec to engine configuration.
//!
//! Translation is pure: it only builds an [`EngineConfig`], so a bad bundle
//! is rejected before anything is provisioned. [`ContainerConfigurer::commit`]
//! saves the result as the final step, and nothing touches the configuration
//! afterwards.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use cradle_common::{ContainerId, CradleError, CradleResult};
use cradle_oci::Spec;
use cradle_oci::runtime::Mount;

use super::config::RuntimeConfig;
use crate::engine::config::keys;
use crate::engine::{ContainerEngine, EngineConfig};

/// fstab placeholder for a missing source or type.
const FSTAB_NONE: &str = "none";
/// fstab placeholder for an empty option list.
const FSTAB_DEFAULTS: &str = "defaults";

/// Maps a bundle spec onto the engine's configuration model.
#[derive(Debug, Clone, Copy)]
pub struct ContainerConfigurer<'a> {
    config: &'a RuntimeConfig,
}

impl<'a> ContainerConfigurer<'a> {
    /// Create a configurer for the given runtime configuration.
    #[must_use]
    pub const fn new(config: &'a RuntimeConfig) -> Self {
        Self { config }
    }

    /// Translate `spec` into engine configuration items for container `id`.
    ///
    /// # Errors
    ///
    /// Fails if the spec lacks a root or a process, if a mount cannot be
    /// written as an fstab line, or if the engine rejects an item.
    pub fn translate(&self, id: &ContainerId, spec: &Spec) -> CradleResult<EngineConfig> {
        let root = spec.require_root()?;
        let process = spec.require_process()?;
        let mut config = EngineConfig::new();

        if let Some(level) = self.config.effective_engine_log_level() {
            config.set(keys::LOG_LEVEL, level)?;
        }
        if let Some(file) = &self.config.engine_log.file {
            config.set(keys::LOG_FILE, file.to_string_lossy())?;
        }

        config.set(keys::ROOTFS_PATH, root.path.to_string_lossy())?;
        // The bundle owns the rootfs; LXC must never provision or destroy it.
        config.set(keys::ROOTFS_MANAGED, "0")?;
        if root.readonly {
            config.set(keys::ROOTFS_OPTIONS, "ro")?;
        }

        for var in &process.env {
            config.set(keys::ENVIRONMENT, var.as_str())?;
        }

        for mount in &spec.mounts {
            config.set(keys::MOUNT_ENTRY, mount_entry(mount)?)?;
        }

        config.set(keys::INIT_CWD, process.cwd.to_string_lossy())?;

        if let Some(hostname) = &spec.hostname {
            config.set(keys::UTS_NAME, hostname.as_str())?;
        }

        config.set(keys::EXECUTE_CMD, command_line(&process.args))?;

        config.set(keys::HOOK_VERSION, "1")?;
        config.set(
            keys::HOOK_START_HOST,
            self.config.paths.sync_hook(id).to_string_lossy(),
        )?;

        Ok(config)
    }

    /// Persist a translated configuration through `engine`.
    ///
    /// This is the last configuration step. The record is never modified
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot save the record.
    pub async fn commit(
        engine: &dyn ContainerEngine,
        id: &ContainerId,
        config: &EngineConfig,
    ) -> CradleResult<()> {
        engine.save(id, config).await?;
        tracing::info!(container_id = %id, items = config.len(), "Configured container");
        Ok(())
    }
}

/// Render an OCI mount as an fstab line.
///
/// The destination is made relative to the rootfs, as LXC resolves relative
/// mount targets inside the container.
///
/// A missing source or type is written as `none` and an empty option list as
/// `defaults`, so a literal `none` source and an option list of just
/// `defaults` read back as absent. Both mean the same thing to mount(8).
///
/// # Errors
///
/// Fails for a mount onto the container root itself, and for fields fstab
/// cannot express: an empty source or type, and an empty option or one
/// containing a comma.
pub fn mount_entry(mount: &Mount) -> CradleResult<String> {
    let destination = mount.destination.to_string_lossy();
    let relative = destination.trim_start_matches('/');
    if relative.is_empty() {
        return Err(CradleError::Config {
            message: format!("cannot mount over the container root ('{destination}')"),
        });
    }

    let invalid = |what: &str| CradleError::Config {
        message: format!("mount on '{destination}': {what}"),
    };
    if mount.source.as_ref().is_some_and(|s| s.as_os_str().is_empty()) {
        return Err(invalid("empty source"));
    }
    if mount.mount_type.as_ref().is_some_and(String::is_empty) {
        return Err(invalid("empty type"));
    }
    if let Some(option) = mount
        .options
        .iter()
        .find(|o| o.is_empty() || o.contains(','))
    {
        return Err(invalid(&format!("unrepresentable option '{option}'")));
    }

    let source = mount
        .source
        .as_deref()
        .map_or(Cow::Borrowed(FSTAB_NONE), Path::to_string_lossy);
    let fstype = mount.mount_type.as_deref().unwrap_or(FSTAB_NONE);
    let options = if mount.options.is_empty() {
        FSTAB_DEFAULTS.to_string()
    } else {
        mount.options.join(",")
    };

    Ok(format!(
        "{} {} {} {}",
        fstab_escape(&source),
        fstab_escape(relative),
        fstab_escape(fstype),
        fstab_escape(&options),
    ))
}

/// Parse an fstab line written by [`mount_entry`] back into an OCI mount.
///
/// # Errors
///
/// Fails if the line does not have four to six fields.
pub fn parse_mount_entry(entry: &str) -> CradleResult<Mount> {
    let fields: Vec<String> = entry
        .split(' ')
        .filter(|f| !f.is_empty())
        .map(fstab_unescape)
        .collect();

    let [source, destination, fstype, options, ..] = fields.as_slice() else {
        return Err(CradleError::Config {
            message: format!("malformed mount entry '{entry}'"),
        });
    };
    if fields.len() > 6 {
        return Err(CradleError::Config {
            message: format!("malformed mount entry '{entry}'"),
        });
    }

    let destination = if destination.starts_with('/') {
        PathBuf::from(destination)
    } else {
        Path::new("/").join(destination)
    };

    Ok(Mount {
        destination,
        mount_type: (fstype != FSTAB_NONE).then(|| fstype.clone()),
        source: (source != FSTAB_NONE).then(|| PathBuf::from(source)),
        options: if options == FSTAB_DEFAULTS {
            Vec::new()
        } else {
            options.split(',').map(str::to_string).collect()
        },
    })
}

fn fstab_escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => out.push_str("\\040"),
            '\t' => out.push_str("\\011"),
            '\n' => out.push_str("\\012"),
            '\\' => out.push_str("\\134"),
            c => out.push(c),
        }
    }
    out
}

fn fstab_unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let code = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(code);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Render argv as a single shell-quoted command line.
#[must_use]
pub fn command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_escape::escape(Cow::Borrowed(arg.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a command line written by [`command_line`] back into argv.
///
/// Understands single quotes, double quotes and backslash escapes.
///
/// # Errors
///
/// Fails on an unterminated quote or a trailing backslash.
pub fn parse_command_line(line: &str) -> CradleResult<Vec<String>> {
    let malformed = |why: &str| CradleError::Config {
        message: format!("malformed command line '{line}': {why}"),
    };

    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(malformed("unterminated single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(malformed("unterminated double quote")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(malformed("unterminated double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next().ok_or_else(|| malformed("trailing backslash"))?);
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spec() -> Spec {
        serde_json::from_str(
            r#"{
                "root": { "path": "/bundles/c1/rootfs" },
                "process": {
                    "args": ["/bin/sh", "-c", "echo 'hi there'"],
                    "env": ["PATH=/usr/bin:/bin", "GREETING=hello world"],
                    "cwd": "/work"
                },
                "hostname": "box",
                "mounts": [
                    { "destination": "/proc", "type": "proc", "source": "proc" },
                    { "destination": "/dev/shm", "type": "tmpfs", "source": "shm",
                      "options": ["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"] }
                ]
            }"#,
        )
        .unwrap()
    }

    fn id() -> ContainerId {
        ContainerId::new("c1").unwrap()
    }

    #[test]
    fn translate_full_spec() {
        let runtime = RuntimeConfig::default().with_root("/var/lib/lxc");
        let config = ContainerConfigurer::new(&runtime)
            .translate(&id(), &spec())
            .unwrap();

        insta::assert_snapshot!(config.to_string().trim_end(), @r"
        lxc.rootfs.path = /bundles/c1/rootfs
        lxc.rootfs.managed = 0
        lxc.environment = PATH=/usr/bin:/bin
        lxc.environment = GREETING=hello world
        lxc.mount.entry = proc proc proc defaults
        lxc.mount.entry = shm dev/shm tmpfs nosuid,noexec,nodev,mode=1777,size=65536k
        lxc.init.cwd = /work
        lxc.uts.name = box
        lxc.execute.cmd = /bin/sh -c 'echo '\''hi there'\'''
        lxc.hook.version = 1
        lxc.hook.start-host = /var/lib/lxc/c1/sync-fifo-wait
        ");
    }

    #[test]
    fn translate_logging_and_readonly_root() {
        let runtime = RuntimeConfig::default()
            .with_debug(true)
            .with_engine_log_file("/var/log/lxc/c1.log");
        let mut spec = spec();
        if let Some(root) = spec.root.as_mut() {
            root.readonly = true;
        }

        let config = ContainerConfigurer::new(&runtime)
            .translate(&id(), &spec)
            .unwrap();
        assert_eq!(config.first(keys::LOG_LEVEL), Some("DEBUG"));
        assert_eq!(config.first(keys::LOG_FILE), Some("/var/log/lxc/c1.log"));
        assert_eq!(config.first(keys::ROOTFS_OPTIONS), Some("ro"));
    }

    #[test]
    fn translate_requires_process() {
        let mut spec = spec();
        spec.process = None;
        let runtime = RuntimeConfig::default();
        assert!(ContainerConfigurer::new(&runtime).translate(&id(), &spec).is_err());
    }

    #[test]
    fn translate_rejects_multiline_env() {
        let mut spec = spec();
        if let Some(process) = spec.process.as_mut() {
            process.env.push("BAD=two\nlines".to_string());
        }
        let runtime = RuntimeConfig::default();
        let err = ContainerConfigurer::new(&runtime)
            .translate(&id(), &spec)
            .unwrap_err();
        assert!(matches!(err, CradleError::Engine { .. }));
    }

    #[test]
    fn mount_entry_escapes_whitespace() {
        let mount = Mount {
            destination: "/mnt/my data".into(),
            mount_type: Some("bind".to_string()),
            source: Some("/srv/tab\there".into()),
            options: vec!["rbind".to_string(), "ro".to_string()],
        };
        let entry = mount_entry(&mount).unwrap();
        assert_eq!(entry, r"/srv/tab\011here mnt/my\040data bind rbind,ro");
        assert_eq!(parse_mount_entry(&entry).unwrap(), mount);
    }

    #[test]
    fn mount_entry_placeholders() {
        let mount = Mount {
            destination: "/run".into(),
            mount_type: None,
            source: None,
            options: Vec::new(),
        };
        let entry = mount_entry(&mount).unwrap();
        assert_eq!(entry, "none run none defaults");
        assert_eq!(parse_mount_entry(&entry).unwrap(), mount);
    }

    #[test]
    fn mount_entry_rejects_unrepresentable_fields() {
        let base = Mount {
            destination: "/data".into(),
            mount_type: Some("bind".to_string()),
            source: Some("/srv/data".into()),
            options: vec!["rbind".to_string()],
        };
        assert!(mount_entry(&base).is_ok());

        let empty_source = Mount {
            source: Some(PathBuf::new()),
            ..base.clone()
        };
        let empty_type = Mount {
            mount_type: Some(String::new()),
            ..base.clone()
        };
        let empty_option = Mount {
            options: vec![String::new()],
            ..base.clone()
        };
        let comma_option = Mount {
            options: vec!["rbind".to_string(), "a,b".to_string()],
            ..base
        };
        for mount in [empty_source, empty_type, empty_option, comma_option] {
            let err = mount_entry(&mount).unwrap_err();
            assert!(matches!(err, CradleError::Config { .. }), "{mount:?}");
        }
    }

    #[test]
    fn defaults_option_reads_back_empty() {
        let mount = Mount {
            destination: "/tmp".into(),
            mount_type: Some("tmpfs".to_string()),
            source: Some("tmpfs".into()),
            options: vec![FSTAB_DEFAULTS.to_string()],
        };
        let entry = mount_entry(&mount).unwrap();
        assert_eq!(entry, "tmpfs tmp tmpfs defaults");
        assert!(parse_mount_entry(&entry).unwrap().options.is_empty());
    }

    #[test]
    fn translate_rejects_empty_mount_source() {
        let mut spec = spec();
        spec.mounts.push(Mount {
            destination: "/data".into(),
            mount_type: Some("bind".to_string()),
            source: Some(PathBuf::new()),
            options: vec!["rbind".to_string()],
        });
        let runtime = RuntimeConfig::default();
        let err = ContainerConfigurer::new(&runtime)
            .translate(&id(), &spec)
            .unwrap_err();
        assert!(matches!(err, CradleError::Config { .. }));
    }

    #[test]
    fn mount_over_root_is_rejected() {
        let mount = Mount {
            destination: "/".into(),
            mount_type: None,
            source: None,
            options: Vec::new(),
        };
        assert!(mount_entry(&mount).is_err());
    }

    #[test]
    fn parse_mount_entry_accepts_dump_and_pass() {
        let mount = parse_mount_entry("proc proc proc nosuid 0 0").unwrap();
        assert_eq!(mount.destination, PathBuf::from("/proc"));
        assert_eq!(mount.options, ["nosuid"]);
        assert!(parse_mount_entry("proc proc").is_err());
        assert!(parse_mount_entry("a b c d 0 0 extra").is_err());
    }

    #[test]
    fn command_line_quotes_when_needed() {
        let args: Vec<String> = ["/bin/echo", "plain", "two words", "", "it's"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let line = command_line(&args);
        assert!(line.starts_with("/bin/echo plain 'two words' ''"));
        assert_eq!(parse_command_line(&line).unwrap(), args);
    }

    #[test]
    fn parse_command_line_styles() {
        assert_eq!(
            parse_command_line(r#"sh -c "echo \"$HOME\"" a\ b"#).unwrap(),
            ["sh", "-c", "echo \"$HOME\"", "a b"]
        );
        assert!(parse_command_line("sh 'open").is_err());
        assert!(parse_command_line("sh \"open").is_err());
        assert!(parse_command_line("trailing\\").is_err());
    }

    fn arb_field() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _./=\\\\-]{1,12}".prop_filter("placeholder", |s| {
            s != FSTAB_NONE && s != FSTAB_DEFAULTS
        })
    }

    proptest! {
        #[test]
        fn argv_round_trips(args in prop::collection::vec("[^\n\r\0]{0,16}", 1..6)) {
            let line = command_line(&args);
            prop_assert_eq!(parse_command_line(&line).unwrap(), args);
        }

        #[test]
        fn mounts_round_trip(
            source in arb_field(),
            dest in "[a-z0-9 _.-]{1,12}(/[a-z0-9 _.-]{1,12}){0,2}",
            fstype in "[a-z0-9]{1,8}".prop_filter("placeholder", |s| s != FSTAB_NONE),
            options in prop::collection::vec("[a-z0-9=_]{1,10}", 0..5)
                .prop_filter("placeholder", |o| o != &[FSTAB_DEFAULTS]),
        ) {
            let mount = Mount {
                destination: PathBuf::from(format!("/{dest}")),
                mount_type: Some(fstype),
                source: Some(PathBuf::from(source)),
                options,
            };
            let entry = mount_entry(&mount).unwrap();
            prop_assert_eq!(parse_mount_entry(&entry).unwrap(), mount);
        }
    }
}
