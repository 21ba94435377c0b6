use bmap_format::ChecksumKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "bmaptool", version)]
#[command(about = "Create block maps of sparse images and copy images with them", long_about = None)]
pub struct Cli {
    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    /// Print debugging messages
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a bmap for an image file
    Create {
        /// Path to the image file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Write the bmap to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Do not compute checksums of the mapped ranges
        #[arg(long)]
        no_checksum: bool,

        /// Checksum algorithm for the mapped ranges
        #[arg(long, value_enum, default_value_t = ChecksumArg::Sha1, conflicts_with = "no_checksum")]
        checksum: ChecksumArg,
    },

    /// Write an image to a block device or file using its bmap
    Copy {
        /// Path to the image file, optionally compressed
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Destination block device or file
        #[arg(value_name = "DEST")]
        dest: PathBuf,

        /// Bmap file to use (found next to the image by default)
        #[arg(long, value_name = "FILE", conflicts_with = "nobmap")]
        bmap: Option<PathBuf>,

        /// Copy the whole image without a bmap
        #[arg(long)]
        nobmap: bool,

        /// Do not verify checksums of the mapped ranges
        #[arg(long)]
        no_verify: bool,

        /// Do not sync the destination after copying
        #[arg(long)]
        no_sync: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChecksumArg {
    Sha1,
    Sha256,
}

impl From<ChecksumArg> for ChecksumKind {
    fn from(value: ChecksumArg) -> Self {
        match value {
            ChecksumArg::Sha1 => Self::Sha1,
            ChecksumArg::Sha256 => Self::Sha256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_conflicting_flags() {
        assert!(Cli::try_parse_from(["bmaptool", "-q", "-d", "create", "a.img"]).is_err());
        assert!(
            Cli::try_parse_from(["bmaptool", "copy", "a.img", "b", "--bmap", "a.bmap", "--nobmap"])
                .is_err()
        );
    }

    #[test]
    fn test_copy_defaults() {
        let cli = Cli::try_parse_from(["bmaptool", "copy", "a.img.gz", "/dev/sdz"]).unwrap();

        match cli.command {
            Command::Copy {
                bmap,
                nobmap,
                no_verify,
                no_sync,
                ..
            } => {
                assert_eq!(bmap, None);
                assert!(!nobmap && !no_verify && !no_sync);
            }
            Command::Create { .. } => panic!("expected copy"),
        }
    }
}
