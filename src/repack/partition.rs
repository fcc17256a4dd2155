//! Boot image extraction from a hybrid source ISO.
//!
//! Reads the partition table directly rather than shelling out to a
//! partitioning tool. GPT is tried first; a protective/hybrid MBR entry of
//! type 0xEF is the fallback.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Bytes of boot code copied from the source ISO's first sector. The rest of
/// the sector (disk signature and partition table) is rebuilt by xorriso.
pub const MBR_TEMPLATE_LEN: usize = 432;

const SECTOR_SIZE: u64 = 512;
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const MBR_BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MBR_PARTITION_TABLE: usize = 446;
const MBR_EFI_TYPE: u8 = 0xEF;
/// Upper bounds on what a GPT header may ask us to read.
const MAX_GPT_ENTRIES: u32 = 1024;
const MIN_GPT_ENTRY_SIZE: usize = 128;
const MAX_GPT_ENTRY_SIZE: usize = 4096;

/// EFI System Partition type GUID, in on-disk (mixed-endian) byte order.
pub const EFI_SYSTEM_GUID: [u8; 16] = [
    0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9, 0x3b,
];

/// Location of a partition in 512-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionExtent {
    pub start_sector: u64,
    pub sector_count: u64,
}

impl PartitionExtent {
    /// `None` if the offset does not fit in a u64.
    pub fn byte_offset(&self) -> Option<u64> {
        self.start_sector.checked_mul(SECTOR_SIZE)
    }

    pub fn byte_len(&self) -> Option<u64> {
        self.sector_count.checked_mul(SECTOR_SIZE)
    }

    /// First byte past the partition.
    pub fn byte_end(&self) -> Option<u64> {
        self.byte_offset()?.checked_add(self.byte_len()?)
    }
}

fn u32_le(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn u64_le(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Find the EFI system partition in `image`.
pub fn find_efi_partition(image: &Path) -> Result<PartitionExtent> {
    let mut file =
        File::open(image).with_context(|| format!("open {}", image.display()))?;

    if let Some(extent) = find_in_gpt(&mut file)? {
        tracing::debug!("EFI partition from GPT: {:?}", extent);
        return Ok(extent);
    }
    if let Some(extent) = find_in_mbr(&mut file)? {
        tracing::debug!("EFI partition from MBR: {:?}", extent);
        return Ok(extent);
    }
    bail!("no EFI system partition found in {}", image.display())
}

fn find_in_gpt(file: &mut File) -> Result<Option<PartitionExtent>> {
    let mut header = [0u8; SECTOR_SIZE as usize];
    if read_at(file, SECTOR_SIZE, &mut header).is_err() {
        return Ok(None);
    }
    if &header[0..8] != GPT_SIGNATURE {
        return Ok(None);
    }

    let entries_lba = u64_le(&header, 72);
    let entry_count = u32_le(&header, 80);
    let entry_size = u32_le(&header, 84) as usize;
    if !(MIN_GPT_ENTRY_SIZE..=MAX_GPT_ENTRY_SIZE).contains(&entry_size)
        || entry_count > MAX_GPT_ENTRIES
    {
        bail!(
            "implausible GPT header ({} entries of {} bytes)",
            entry_count,
            entry_size
        );
    }
    let Some(entries_start) = entries_lba.checked_mul(SECTOR_SIZE) else {
        bail!("GPT partition entries at LBA {} are out of range", entries_lba);
    };

    let mut entry = vec![0u8; entry_size];
    for i in 0..u64::from(entry_count) {
        let Some(offset) = i
            .checked_mul(entry_size as u64)
            .and_then(|rel| entries_start.checked_add(rel))
        else {
            bail!("GPT partition entry {} is out of range", i);
        };
        read_at(file, offset, &mut entry).context("read GPT partition entry")?;
        if entry[0..16] != EFI_SYSTEM_GUID {
            continue;
        }
        let first = u64_le(&entry, 32);
        let last = u64_le(&entry, 40);
        if last < first {
            bail!("GPT entry {} has last LBA {} before first LBA {}", i, last, first);
        }
        let extent = (last - first)
            .checked_add(1)
            .map(|sector_count| PartitionExtent {
                start_sector: first,
                sector_count,
            })
            .filter(|extent| extent.byte_end().is_some());
        let Some(extent) = extent else {
            bail!("GPT entry {} covers LBA {}..={}, out of range", i, first, last);
        };
        return Ok(Some(extent));
    }
    Ok(None)
}

fn find_in_mbr(file: &mut File) -> Result<Option<PartitionExtent>> {
    let mut mbr = [0u8; SECTOR_SIZE as usize];
    read_at(file, 0, &mut mbr).context("read MBR")?;
    if mbr[510..512] != MBR_BOOT_SIGNATURE {
        return Ok(None);
    }

    for slot in 0..4 {
        let e = &mbr[MBR_PARTITION_TABLE + slot * 16..MBR_PARTITION_TABLE + (slot + 1) * 16];
        if e[4] != MBR_EFI_TYPE {
            continue;
        }
        let start = u32_le(e, 8);
        let count = u32_le(e, 12);
        if count == 0 {
            continue;
        }
        return Ok(Some(PartitionExtent {
            start_sector: u64::from(start),
            sector_count: u64::from(count),
        }));
    }
    Ok(None)
}

/// Copy the first [`MBR_TEMPLATE_LEN`] bytes of `image` to `dest`.
pub fn extract_mbr_template(image: &Path, dest: &Path) -> Result<()> {
    let mut file =
        File::open(image).with_context(|| format!("open {}", image.display()))?;
    let mut buf = [0u8; MBR_TEMPLATE_LEN];
    file.read_exact(&mut buf)
        .with_context(|| format!("{} is too short to hold an MBR", image.display()))?;
    std::fs::write(dest, buf).with_context(|| format!("write {}", dest.display()))?;
    Ok(())
}

/// Copy the bytes covered by `extent` out of `image` into `dest`.
pub fn extract_partition(image: &Path, extent: PartitionExtent, dest: &Path) -> Result<()> {
    let mut src =
        File::open(image).with_context(|| format!("open {}", image.display()))?;
    let image_len = src.metadata()?.len();
    let (Some(offset), Some(len), Some(end)) =
        (extent.byte_offset(), extent.byte_len(), extent.byte_end())
    else {
        bail!("partition {:?} is out of range", extent);
    };
    if end > image_len {
        bail!(
            "partition {:?} ends at byte {} past the end of {} ({} bytes)",
            extent,
            end,
            image.display(),
            image_len
        );
    }

    src.seek(SeekFrom::Start(offset))?;
    let mut out = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let copied = std::io::copy(&mut src.take(len), &mut out)?;
    out.flush()?;
    if copied != len {
        bail!("short read: copied {} of {} bytes", copied, len);
    }
    Ok(())
}
