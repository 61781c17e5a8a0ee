use clap::{Parser, Subcommand};

/// This is an anonymous-survey sampling and tabulation program.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The SQLite database holding identities, surveys, responses
    /// and rosters.
    #[clap(short, long, value_parser)]
    pub db: String,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Creates the database schema (idempotent).
    Init,

    /// Bulk-imports a population of anonymous identities from a JSON file.
    Import {
        /// (file path) The population description. See the documentation for the format.
        #[clap(short, long, value_parser)]
        population: String,
    },

    /// Creates a survey instance with its questions from a JSON file.
    Define {
        /// (file path) The survey description. See the documentation for the format.
        #[clap(short, long, value_parser)]
        survey: String,
    },

    /// Selects the eligible respondents of a survey: filters the active
    /// population, optionally samples a percentage of it, and persists the
    /// roster.
    Sample {
        /// The survey instance to build the roster for.
        #[clap(short, long, value_parser)]
        survey: u64,
        /// (file path, optional) A filter specification in JSON format. An
        /// absent filter matches the entire active population.
        #[clap(short, long, value_parser)]
        filter: Option<String>,
        /// (optional) The percentage of the filtered population to keep, in
        /// (0, 100]. Absent means the full filtered population.
        #[clap(short, long, value_parser)]
        percent: Option<f64>,
        /// (file path, optional) Writes the roster summary to this location
        /// instead of the standard output.
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },

    /// Records one submission for one identity (duplicates are rejected).
    Submit {
        #[clap(short, long, value_parser)]
        survey: u64,
        #[clap(short, long, value_parser)]
        identity: u64,
        /// (file path) The answers, in JSON format.
        #[clap(short, long, value_parser)]
        answers: String,
    },

    /// Tabulates one survey instance, withholding results below the
    /// anonymity threshold.
    Results {
        #[clap(short, long, value_parser)]
        survey: u64,
        /// (file path, optional) A demographic sub-filter applied to the
        /// responses before the anonymity check.
        #[clap(short, long, value_parser)]
        filter: Option<String>,
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },

    /// Aligns the questions of a survey's tracking group across waves and
    /// reports the per-question time series.
    Waves {
        #[clap(short, long, value_parser)]
        survey: u64,
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },

    /// Removes an organizational unit, deactivating the identities attached
    /// to it.
    RemoveUnit {
        #[clap(short, long, value_parser)]
        unit: u64,
    },
}
