//! Shared test utilities for preseed-iso integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;

use tempfile::TempDir;

pub const STOCK_GRUB_CFG: &str = "menuentry \"Try or Install Ubuntu\" {\n\tset gfxpayload=keep\n\tlinux\t/casper/vmlinuz  file=/cdrom/preseed/ubuntu.seed maybe-ubiquity quiet splash ---\n\tinitrd\t/casper/initrd\n}\n";

/// Test environment: work dir, scratch parent and fake tools in one tempdir.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub work_dir: PathBuf,
    pub scratch_parent: PathBuf,
    pub bin_dir: PathBuf,
    pub preseed: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let work_dir = root.join("work");
        let scratch_parent = root.join("scratch");
        let bin_dir = root.join("bin");
        for dir in [&work_dir, &scratch_parent, &bin_dir] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        let preseed = root.join("unattended.seed");
        fs::write(
            &preseed,
            "d-i debian-installer/locale string en_US\nubiquity ubiquity/success_command string true\n",
        )
        .expect("Failed to write preseed");

        write_script(&bin_dir.join("xorriso"), &fake_xorriso_script(&bin_dir));
        write_script(&bin_dir.join("gpg"), FAKE_GPG);
        fs::write(bin_dir.join("isohdpfx.bin"), [0x33u8; 432]).expect("Failed to write MBR");

        Self {
            _temp_dir: temp_dir,
            root,
            work_dir,
            scratch_parent,
            bin_dir,
            preseed,
        }
    }

    pub fn xorriso(&self) -> PathBuf {
        self.bin_dir.join("xorriso")
    }

    pub fn gpg(&self) -> PathBuf {
        self.bin_dir.join("gpg")
    }

    pub fn isohybrid_mbr(&self) -> PathBuf {
        self.bin_dir.join("isohdpfx.bin")
    }

    /// Every argument line the fake xorriso was called with.
    pub fn xorriso_calls(&self) -> Vec<String> {
        fs::read_to_string(self.bin_dir.join("xorriso.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// A source ISO with a GPT-described EFI partition.
    pub fn write_source_iso(&self) -> PathBuf {
        let path = self.root.join("source.iso");
        fs::write(&path, gpt_image()).expect("Failed to write source ISO");
        path
    }

    /// Environment pointing the binary and `Config::from_lookup` at this env.
    pub fn vars(&self, mirror: Option<&str>) -> Vec<(String, String)> {
        let mut vars = vec![
            ("PRESEED_WORK_DIR", self.work_dir.display().to_string()),
            ("PRESEED_SCRATCH_PARENT", self.scratch_parent.display().to_string()),
            ("PRESEED_XORRISO", self.xorriso().display().to_string()),
            ("PRESEED_GPG", self.gpg().display().to_string()),
            ("PRESEED_ISOHYBRID_MBR", self.isohybrid_mbr().display().to_string()),
            ("PRESEED_KEYSERVER", "hkp://127.0.0.1:9".to_string()),
        ];
        if let Some(mirror) = mirror {
            vars.push(("PRESEED_MIRROR", mirror.to_string()));
        }
        vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn config(&self, mirror: Option<&str>) -> preseed_iso::config::Config {
        let vars = self.vars(mirror);
        preseed_iso::config::Config::from_lookup(|key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
    }

    /// Run the preseed-iso binary with `args`.
    pub fn run_bin(&self, args: &[&str], mirror: Option<&str>) -> Output {
        Command::new(env!("CARGO_BIN_EXE_preseed-iso"))
            .args(args)
            .envs(self.vars(mirror))
            .env_remove("RUST_LOG")
            .current_dir(&self.root)
            .output()
            .expect("Failed to run preseed-iso")
    }

    /// Start the preseed-iso binary with `args` without waiting for it.
    pub fn spawn_bin(&self, args: &[&str]) -> Child {
        Command::new(env!("CARGO_BIN_EXE_preseed-iso"))
            .args(args)
            .envs(self.vars(None))
            .env_remove("RUST_LOG")
            .current_dir(&self.root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to start preseed-iso")
    }

    /// Swap in an xorriso that extracts normally but, when building, writes
    /// half an ISO, records its pid in `xorriso.pid` and never finishes.
    pub fn install_stalling_xorriso(&self) {
        let normal = fake_xorriso_script(&self.bin_dir);
        let build = "out=\"\"\n";
        let stall = format!(
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo half > "$out"
echo $$ > "{dir}/xorriso.pid"
exec sleep 30
"#,
            dir = self.bin_dir.display()
        );
        let head = &normal[..normal.find(build).expect("build section")];
        write_script(&self.xorriso(), &format!("{}{}{}", head, build, stall));
    }

    /// ISOs produced in the work directory.
    pub fn output_isos(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(&self.work_dir)
            .expect("Failed to read work dir")
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy();
                name.starts_with("ubuntu-preseed-") && name.ends_with(".iso")
            })
            .collect();
        found.sort();
        found
    }

    /// No `.preseed-scratch-*` left behind.
    pub fn scratch_is_clean(&self) -> bool {
        fs::read_dir(&self.scratch_parent)
            .expect("Failed to read scratch parent")
            .count()
            == 0
    }
}

pub fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("Failed to write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("Failed to chmod script");
}

/// A stand-in xorriso. Extraction lays down a small read-only Ubuntu tree
/// (including a `[BOOT]` artifact); building writes a listing of the tree
/// followed by its GRUB config to the `-o` file.
fn fake_xorriso_script(log_dir: &Path) -> String {
    format!(
        r#"#!/bin/sh
echo "$@" >> "{log}/xorriso.log"
if [ "$1" = "-osirrox" ]; then
  tree="$7"
  mkdir -p "$tree/boot/grub" "$tree/isolinux" "$tree/casper" "$tree/preseed" "$tree/[BOOT]"
  printf 'menuentry "Try or Install Ubuntu" {{\n\tlinux\t/casper/vmlinuz  file=/cdrom/preseed/ubuntu.seed maybe-ubiquity quiet splash ---\n}}\n' > "$tree/boot/grub/grub.cfg"
  printf 'menuentry "Try Ubuntu" {{\n\tlinux\t/casper/vmlinuz  file=/cdrom/preseed/ubuntu.seed maybe-ubiquity iso-scan/filename=${{iso_path}} quiet splash ---\n}}\n' > "$tree/boot/grub/loopback.cfg"
  echo 'default live' > "$tree/isolinux/txt.cfg"
  echo 'kernel' > "$tree/casper/vmlinuz"
  echo '# stock' > "$tree/preseed/ubuntu.seed"
  echo 'eltorito' > "$tree/[BOOT]/1-Boot-NoEmul.img"
  echo 'full manifest' > "$tree/md5sum.txt"
  chmod -R a-w "$tree"
  exit 0
fi
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
[ -n "$out" ] || exit 2
{{ find . -print | sort; echo ---; cat boot/grub/grub.cfg; echo ---; cat md5sum.txt; }} > "$out"
"#,
        log = log_dir.display()
    )
}

/// A stand-in gpg: --recv-keys writes the keyring, --verify accepts only
/// signature files containing GOOD.
const FAKE_GPG: &str = r#"#!/bin/sh
keyring=""; mode=""; sig=""
while [ $# -gt 0 ]; do
  case "$1" in
    --keyring) keyring="$2"; shift ;;
    --recv-keys) mode=recv ;;
    --verify) mode=verify; sig="$2"; shift ;;
  esac
  shift
done
if [ "$mode" = recv ]; then echo key > "$keyring"; exit 0; fi
if [ "$mode" = verify ]; then grep -q GOOD "$sig" && exit 0; echo "gpg: BAD signature" >&2; exit 1; fi
exit 2
"#;

/// 16-sector disk image: GPT header at LBA 1, entries at LBA 2, and an EFI
/// system partition over sectors 8..=11.
pub fn gpt_image() -> Vec<u8> {
    const SECTOR: usize = 512;
    let esp_guid: [u8; 16] = [
        0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9,
        0x3b,
    ];

    let mut img = vec![0u8; 16 * SECTOR];
    img[..432].fill(0xEB);
    img[510] = 0x55;
    img[511] = 0xAA;

    let h = SECTOR;
    img[h..h + 8].copy_from_slice(b"EFI PART");
    img[h + 72..h + 80].copy_from_slice(&2u64.to_le_bytes());
    img[h + 80..h + 84].copy_from_slice(&4u32.to_le_bytes());
    img[h + 84..h + 88].copy_from_slice(&128u32.to_le_bytes());

    let e = 2 * SECTOR;
    img[e..e + 16].copy_from_slice(&esp_guid);
    img[e + 32..e + 40].copy_from_slice(&8u64.to_le_bytes());
    img[e + 40..e + 48].copy_from_slice(&11u64.to_le_bytes());
    img[8 * SECTOR..12 * SECTOR].fill(0xE5);
    img
}

/// Minimal HTTP/1.1 file server over `root`, for mirror tests.
///
/// Serves GET requests until the process exits; unknown paths get 404.
pub fn serve_dir(root: &Path) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let addr = listener.local_addr().expect("No local addr");
    let root = root.to_path_buf();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" || header == "\n" => break,
                    Ok(_) => {}
                }
            }

            let path = request_line.split_whitespace().nth(1).unwrap_or("/");
            let file = root.join(path.trim_start_matches('/'));
            let response = match fs::read(&file) {
                Ok(body) => {
                    let mut r = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    )
                    .into_bytes();
                    r.extend_from_slice(&body);
                    r
                }
                Err(_) => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_vec(),
            };
            let _ = stream.write_all(&response);
            let _ = stream.flush();
        }
    });

    format!("http://{}", addr)
}

/// Lay out `<mirror>/<codename>/daily-live/current/` with the given files.
pub fn mirror_release_dir(mirror_root: &Path, codename: &str) -> PathBuf {
    let dir = mirror_root.join(codename).join("daily-live/current");
    fs::create_dir_all(&dir).expect("Failed to create mirror dir");
    dir
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(bytes))
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}
