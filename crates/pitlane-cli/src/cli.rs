use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pitlane")]
#[command(about = "Assign race vehicles, move kids between teams, read the history")]
#[command(version)]
pub struct Cli {
    /// Who is making the change (defaults to the signed-in user)
    #[arg(long, global = true, env = "PITLANE_ACTOR")]
    pub actor: Option<String>,

    /// Tag written into each history entry's metadata
    #[arg(long, global = true)]
    pub source: Option<String>,

    /// Firebase auth emulator host, e.g. http://localhost:9099
    #[arg(long, global = true, env = "PITLANE_AUTH_EMULATOR", hide = true)]
    pub auth_emulator: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Optional free-text reason recorded with the change.
#[derive(Args)]
pub struct ReasonArg {
    #[arg(long, short)]
    pub reason: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in and save the session
    Login {
        /// Account email (defaults to the last one used)
        email: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Load kids, vehicles and teams from a JSON file
    Seed {
        file: PathBuf,
    },
    /// List teams with their kids and fleet
    Roster,
    /// Put a kid on a vehicle from their team's fleet
    Assign {
        member: String,
        resource: String,
        #[command(flatten)]
        reason: ReasonArg,
    },
    /// Take a kid off their vehicle
    Unassign {
        member: String,
        #[command(flatten)]
        reason: ReasonArg,
    },
    /// Move an assigned kid to a different vehicle
    Swap {
        member: String,
        resource: String,
        #[command(flatten)]
        reason: ReasonArg,
    },
    /// Move a kid to another team, or off their team with --none
    Move {
        member: String,
        #[arg(required_unless_present = "none", conflicts_with = "none")]
        group: Option<String>,
        /// Leave the current team without joining another
        #[arg(long)]
        none: bool,
        #[command(flatten)]
        reason: ReasonArg,
    },
    /// Take a kid off their vehicle and team
    Release {
        member: String,
        #[command(flatten)]
        reason: ReasonArg,
    },
    /// Instructor commands
    Instructor {
        #[command(subcommand)]
        instructor_cmd: InstructorCommand,
    },
    /// Show history, newest first
    History {
        #[arg(long, conflicts_with_all = ["resource", "group"])]
        member: Option<String>,
        #[arg(long, conflicts_with = "group")]
        resource: Option<String>,
        #[arg(long)]
        group: Option<String>,
        /// Number of entries to show
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Check stored state against the occupancy rules
    Check,
}

#[derive(Subcommand)]
pub enum InstructorCommand {
    /// Add an instructor to a team
    Add { group: String, instructor: String },
    /// Remove an instructor from a team
    Remove { group: String, instructor: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_move() {
        let cli = Cli::parse_from(["pitlane", "move", "k1", "blue", "--reason", "swap day"]);
        match cli.command {
            Command::Move { member, group, none, reason } => {
                assert_eq!(member, "k1");
                assert_eq!(group.as_deref(), Some("blue"));
                assert!(!none);
                assert_eq!(reason.reason.as_deref(), Some("swap day"));
            }
            _ => panic!("expected move"),
        }

        let cli = Cli::parse_from(["pitlane", "move", "k1", "--none"]);
        assert!(matches!(cli.command, Command::Move { group: None, none: true, .. }));

        assert!(Cli::try_parse_from(["pitlane", "move", "k1"]).is_err());
        assert!(Cli::try_parse_from(["pitlane", "move", "k1", "blue", "--none"]).is_err());
    }

    #[test]
    fn test_parse_history_scopes() {
        let cli = Cli::parse_from(["pitlane", "history", "--group", "red", "-l", "5"]);
        match cli.command {
            Command::History { group, limit, member, .. } => {
                assert_eq!(group.as_deref(), Some("red"));
                assert_eq!(limit, Some(5));
                assert!(member.is_none());
            }
            _ => panic!("expected history"),
        }
        assert!(
            Cli::try_parse_from(["pitlane", "history", "--member", "k1", "--group", "red"]).is_err()
        );
    }

    #[test]
    fn test_global_actor_after_subcommand() {
        let cli = Cli::parse_from(["pitlane", "unassign", "k1", "--actor", "coach-7"]);
        assert_eq!(cli.actor.as_deref(), Some("coach-7"));
    }
}
