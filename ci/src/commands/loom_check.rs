use argh::FromArgs;
use xshell::cmd;

use crate::Flag;
use crate::Prepare;
use crate::PreparedCommand;

/// Checks that the library, with its loom-backed platform layer, and the loom
/// models compile.
#[derive(FromArgs, Default)]
#[argh(subcommand, name = "loom-check")]
pub struct LoomCheckCommand {}

impl Prepare for LoomCheckCommand {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, _flags: Flag) -> Vec<PreparedCommand<'a>> {
        vec![
            PreparedCommand::new::<Self>(
                cmd!(sh, "cargo check --lib --test loom"),
                "Please fix compiler errors in output above.",
            )
            .with_env_var("RUSTFLAGS", "--cfg loom"),
        ]
    }
}
