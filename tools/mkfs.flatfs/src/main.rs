//! mkfs.flatfs - Create flatfs disk images
//!
//! Usage:
//!   mkfs.flatfs -o disk.img                       # 512-byte blocks, 4096 blocks, 128 inodes
//!   mkfs.flatfs -o disk.img -b 128 -n 4096 -i 80  # explicit geometry
//!   mkfs.flatfs -o disk.img -d rootfs/ -v         # copy a host directory tree in
//!
//! Set `RUST_LOG=debug` to see library-level events. A flatfs failure exits
//! with its errno value (for example 28 when the image runs out of space).

use clap::Parser;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use flatfs::{FileSystem, FsError};
use flatfs_path as fspath;
use log::info;

#[derive(Parser)]
#[command(name = "mkfs.flatfs")]
#[command(about = "Create flatfs disk images")]
struct Args {
    /// Output disk image file
    #[arg(short, long)]
    output: PathBuf,

    /// Block size in bytes (multiple of 32)
    #[arg(short, long, default_value_t = 512)]
    block_size: u32,

    /// Total number of blocks
    #[arg(short = 'n', long, default_value_t = 4096)]
    blocks: u32,

    /// Number of inodes
    #[arg(short, long, default_value_t = 128)]
    inodes: u32,

    /// Directory to copy files from
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Default)]
struct Counts {
    files: usize,
    dirs: usize,
    skipped: usize,
}

/// Copy `source` into the image directory `target`, recursing into subdirectories
fn populate_recursive(
    volume: &mut FileSystem,
    source: &Path,
    target: &str,
    max_file_size: u64,
    counts: &mut Counts,
    verbose: bool,
) -> Result<(), Box<dyn Error>> {
    let mut entries = fs::read_dir(source)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if !fspath::is_valid_name(&name) {
            eprintln!("Skipping {}: name cannot be stored", entry.path().display());
            counts.skipped += 1;
            continue;
        }

        let dest = fspath::join(target, &name);
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            if let Err(e) = volume.mkdir(&dest) {
                eprintln!("Failed to create directory {}: {}", dest, e);
                counts.skipped += 1;
                continue;
            }
            counts.dirs += 1;
            if verbose {
                println!("  DIR:  {}", dest);
            }
            populate_recursive(volume, &entry.path(), &dest, max_file_size, counts, verbose)?;
        } else if metadata.is_file() {
            let size = metadata.len();
            if size > max_file_size {
                if verbose {
                    println!("  SKIP: {} ({} bytes, too large)", dest, size);
                }
                counts.skipped += 1;
                continue;
            }

            let data = fs::read(entry.path())?;
            let copied = volume.open(&dest).and_then(|mut file| {
                volume.write(&mut file, &data)?;
                volume.close(file)
            });
            match copied {
                Ok(()) => {
                    counts.files += 1;
                    if verbose {
                        println!("  FILE: {} ({} bytes)", dest, size);
                    }
                }
                Err(e @ FsError::NoSpace) => return Err(e.into()),
                Err(e) => {
                    eprintln!("Failed to create file {}: {}", dest, e);
                    counts.skipped += 1;
                }
            }
        }
    }

    Ok(())
}

/// Process exit status for a failed run: the errno of a flatfs error, 1 otherwise
fn exit_status(err: &(dyn Error + 'static)) -> u8 {
    err.downcast_ref::<FsError>()
        .map_or(1, |e| u8::try_from(-e.to_errno()).unwrap_or(1))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mkfs.flatfs: {}", e);
            ExitCode::from(exit_status(e.as_ref()))
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    println!("Creating flatfs disk image: {}", args.output.display());
    let mut volume = FileSystem::new();
    volume.format(&args.output, args.block_size, args.blocks, args.inodes)?;

    let geometry = volume.root_block()?;
    if args.verbose {
        println!("  Block size:        {} bytes", geometry.block_size);
        println!("  Total blocks:      {}", geometry.num_blocks);
        println!("  Bitmap blocks:     {}", geometry.num_free_bitmap_blocks);
        println!("  Inode table:       {} blocks ({} inodes)", geometry.num_inode_table_blocks, geometry.inode_capacity());
        println!("  Root directory:    block {}", geometry.root_dir_block().index());
        println!("  Max file size:     {} bytes", geometry.max_file_size());
    }

    if let Some(ref dir) = args.dir {
        if !dir.is_dir() {
            return Err(format!("Directory not found: {}", dir.display()).into());
        }

        println!("\nPopulating filesystem from: {}", dir.display());
        println!("Note: files larger than {} bytes will be skipped.\n", geometry.max_file_size());

        let mut counts = Counts::default();
        populate_recursive(&mut volume, dir, "/", geometry.max_file_size() as u64, &mut counts, args.verbose)?;
        info!("populated {} files, {} dirs", counts.files, counts.dirs);

        println!("\nPopulation complete:");
        println!("  Files:   {}", counts.files);
        println!("  Dirs:    {}", counts.dirs);
        println!("  Skipped: {}", counts.skipped);
    }

    println!("\n  Free blocks: {}", volume.free_block_count()?);
    println!("  Free inodes: {}", volume.free_inode_count()?);
    volume.unload()?;

    println!("\nDone! flatfs image created.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let no_space: Box<dyn Error> = FsError::NoSpace.into();
        assert_eq!(exit_status(no_space.as_ref()), 28);
        let geometry: Box<dyn Error> = FsError::InvalidGeometry("bad block size").into();
        assert_eq!(exit_status(geometry.as_ref()), 22);
        let other: Box<dyn Error> = "Directory not found: x".into();
        assert_eq!(exit_status(other.as_ref()), 1);
    }
}
