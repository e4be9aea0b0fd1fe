use clinic_core::*;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic treatment lifecycle manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage patients, clinicians and administrators
    #[command(subcommand)]
    User(UserCommand),

    /// Manage the treatment type catalog
    #[command(subcommand)]
    Type(TypeCommand),

    /// Book, assess, cost and settle treatments
    #[command(subcommand)]
    Treatment(TreatmentCommand),

    /// Show clinicians and treatment types matching a speciality
    Speciality {
        /// Speciality name (case-insensitive, exact)
        speciality: String,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Add or replace a user
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long, value_enum)]
        role: RoleArg,

        /// Clinician speciality
        #[arg(long, required_if_eq("role", "clinician"))]
        speciality: Option<String>,

        /// Patient consents to marketing
        #[arg(long)]
        marketing_opt_in: bool,
    },

    /// List all users as JSON
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Patient,
    Clinician,
    Admin,
}

#[derive(Subcommand)]
enum TypeCommand {
    /// Add or replace a treatment type, printing its id
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        price: f64,

        /// Use this id instead of generating one (replaces an existing type)
        #[arg(long)]
        id: Option<String>,

        /// Keep the type in the catalog but mark it inactive
        #[arg(long)]
        inactive: bool,
    },

    /// List the catalog as JSON
    List,

    /// Remove a treatment type
    Remove { id: String },
}

#[derive(Subcommand)]
enum TreatmentCommand {
    /// Book a treatment with a single entry, printing its id
    Create {
        #[arg(long)]
        patient: String,

        #[arg(long)]
        clinician: String,

        #[arg(long = "type")]
        treatment_type: String,

        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },

    /// Book a treatment with one entry per known type, printing its id
    Allocate {
        #[arg(long)]
        patient: String,

        #[arg(long)]
        clinician: String,

        /// Treatment type id (repeatable)
        #[arg(long = "type", required = true)]
        treatment_types: Vec<String>,
    },

    /// Attach assessment notes and mark the treatment assessed
    Assess {
        id: String,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Replace the entries of a new treatment and mark it assessed
    Record {
        id: String,

        /// Entry as TYPE:QUANTITY or TYPE:QUANTITY:NOTES (repeatable)
        #[arg(long = "entry", required = true)]
        entries: Vec<String>,
    },

    /// Price an assessed treatment, printing the total
    Cost { id: String },

    /// Record payment of a costed treatment
    Pay { id: String },

    /// Show one treatment as JSON
    Show { id: String },

    /// List treatments as JSON
    List {
        /// NEW or ASSESSED
        #[arg(long)]
        status: Option<String>,

        #[arg(long, conflicts_with = "patient")]
        clinician: Option<String>,

        #[arg(long)]
        patient: Option<String>,

        /// Only assessed treatments that have not been costed
        #[arg(long, conflicts_with_all = ["status", "clinician", "patient"])]
        pending_costing: bool,
    },

    /// Delete a treatment and its entries
    Delete { id: String },
}

type Engine = TreatmentEngine<CsvTreatmentStore, CsvTreatmentTypeCatalog, UserDirectory>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    clinic_core::logging::init_with_level(&config.logging.level);
    tracing::debug!("Using data directory {:?}", config.data.data_dir);

    match cli.command {
        Commands::User(cmd) => cmd_user(&config, cmd),
        Commands::Type(cmd) => cmd_type(open_engine(&config)?, cmd),
        Commands::Treatment(cmd) => cmd_treatment(open_engine(&config)?, cmd),
        Commands::Speciality { speciality } => cmd_speciality(&open_engine(&config)?, &speciality),
    }
}

fn open_engine(config: &Config) -> Result<Engine> {
    let data = &config.data;
    let store = CsvTreatmentStore::open(data.treatments_path(), data.entries_path())?;
    let catalog = CsvTreatmentTypeCatalog::new(data.types_path());
    let directory = UserDirectory::new(data.users_path());
    Ok(TreatmentEngine::new(store, catalog, directory))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_user(config: &Config, cmd: UserCommand) -> Result<()> {
    let mut directory = UserDirectory::new(config.data.users_path());

    match cmd {
        UserCommand::Add {
            id,
            name,
            email,
            role,
            speciality,
            marketing_opt_in,
        } => {
            let role = match role {
                RoleArg::Patient => Role::Patient { marketing_opt_in },
                RoleArg::Clinician => Role::Clinician {
                    speciality: speciality.unwrap_or_default(),
                },
                RoleArg::Admin => Role::Administrator,
            };
            directory.save(&User {
                id: id.clone(),
                name,
                email,
                role,
            })?;
            println!("{}", id);
        }
        UserCommand::List => print_json(&directory.find_all()?)?,
    }

    Ok(())
}

fn cmd_type(mut engine: Engine, cmd: TypeCommand) -> Result<()> {
    match cmd {
        TypeCommand::Add {
            name,
            price,
            id,
            inactive,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut treatment_type = TreatmentType::new(id, name, price);
            treatment_type.active = !inactive;
            engine.save_treatment_type(&treatment_type)?;
            println!("{}", treatment_type.id);
        }
        TypeCommand::List => print_json(&engine.treatment_types()?)?,
        TypeCommand::Remove { id } => {
            engine.remove_treatment_type(&id)?;
            println!("Removed treatment type {}", id);
        }
    }

    Ok(())
}

fn cmd_treatment(mut engine: Engine, cmd: TreatmentCommand) -> Result<()> {
    match cmd {
        TreatmentCommand::Create {
            patient,
            clinician,
            treatment_type,
            quantity,
        } => {
            let treatment = engine.create(&patient, &clinician, &treatment_type, quantity)?;
            println!("{}", treatment.id());
        }
        TreatmentCommand::Allocate {
            patient,
            clinician,
            treatment_types,
        } => {
            let treatment = engine.allocate(&patient, &clinician, &treatment_types)?;
            println!("{}", treatment.id());
        }
        TreatmentCommand::Assess { id, notes } => {
            let treatment = engine.assess(&id, &notes)?;
            println!("{} {}", treatment.id(), treatment.status());
        }
        TreatmentCommand::Record { id, entries } => {
            let entries = entries
                .iter()
                .map(|raw| parse_entry(raw))
                .collect::<Result<Vec<_>>>()?;
            let treatment = engine.record_assessment(&id, entries)?;
            println!("{} {}", treatment.id(), treatment.status());
        }
        TreatmentCommand::Cost { id } => {
            let total = engine.cost(&id)?;
            println!("{:.2}", total);
        }
        TreatmentCommand::Pay { id } => {
            let treatment = engine.mark_paid(&id)?;
            println!("{} paid {:.2}", treatment.id(), treatment.total_cost());
        }
        TreatmentCommand::Show { id } => print_json(&engine.get(&id)?)?,
        TreatmentCommand::List {
            status,
            clinician,
            patient,
            pending_costing,
        } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let treatments = if pending_costing {
                engine.pending_costing()?
            } else if let Some(clinician) = clinician {
                engine.for_clinician(&clinician, status)?
            } else if let Some(patient) = patient {
                engine
                    .for_patient(&patient)?
                    .into_iter()
                    .filter(|t| status.map_or(true, |s| t.status() == s))
                    .collect()
            } else if let Some(status) = status {
                engine.by_status(status)?
            } else {
                engine.all()?
            };
            print_json(&treatments)?;
        }
        TreatmentCommand::Delete { id } => {
            engine.delete(&id)?;
            println!("Deleted treatment {}", id);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SpecialityMatches {
    clinicians: Vec<User>,
    treatment_types: Vec<TreatmentType>,
}

fn cmd_speciality(engine: &Engine, speciality: &str) -> Result<()> {
    print_json(&SpecialityMatches {
        clinicians: engine.clinicians_for_speciality(speciality)?,
        treatment_types: engine.types_for_speciality(speciality)?,
    })
}

fn parse_status(value: &str) -> Result<TreatmentStatus> {
    value
        .trim()
        .to_uppercase()
        .parse::<TreatmentStatus>()
        .map_err(Error::Validation)
}

/// Parse `TYPE:QUANTITY[:NOTES]`.
fn parse_entry(raw: &str) -> Result<TreatmentEntry> {
    let mut parts = raw.splitn(3, ':');
    let type_id = parts.next().unwrap_or_default().trim();
    let quantity = parts.next().unwrap_or_default().trim();

    if type_id.is_empty() {
        return Err(Error::Validation(format!("entry '{}' has no treatment type", raw)));
    }
    let quantity: u32 = quantity.parse().map_err(|_| {
        Error::Validation(format!("entry '{}' needs a whole-number quantity", raw))
    })?;

    let entry = TreatmentEntry::new(type_id, quantity);
    Ok(match parts.next() {
        Some(notes) => entry.with_notes(notes),
        None => entry,
    })
}
