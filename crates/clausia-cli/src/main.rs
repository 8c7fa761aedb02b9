use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use clausia_core::actions;
use clausia_core::schema::Shape;
use clausia_core::template::{
    self as templates, NewTemplate, NewTemplateClause, TemplateClauseEdit, TemplateCopy,
    TemplateEdit,
};
use clausia_core::transactions::{
    self, Cancellation, FineInputs, NewClause, NewContract, PaymentInputs,
};
use clausia_core::{
    ActionType, AssetKey, Clause, Contract, DataBag, Error, ExecutionReport, Ledger, MemoryLedger,
    Template,
};

mod store;

use store::{FileLedger, StoreError};

/// Clausia — auto-executable contract ledger CLI
///
/// Every subcommand runs as one ledger transaction against a JSON file:
/// it either commits all of its writes or none.
#[derive(Parser)]
#[command(name = "clausia", version, about, long_about = None)]
struct Cli {
    /// Path to the ledger file
    #[arg(
        long,
        global = true,
        env = "CLAUSIA_LEDGER",
        default_value = "clausia-ledger.json"
    )]
    ledger: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user
    CreateUser {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },

    /// Create an auto-executable contract
    CreateContract {
        #[arg(long)]
        name: String,
        /// Owner user key
        #[arg(long, value_parser = parse_key)]
        owner: AssetKey,
        #[arg(long)]
        signature_date: String,
        /// Participant user key (repeatable)
        #[arg(long = "participant", value_parser = parse_key)]
        participants: Vec<AssetKey>,
        /// Initial data bag as a JSON object
        #[arg(long, value_parser = parse_bag)]
        data: Option<DataBag>,
    },

    /// Add a clause to a contract
    AddClause {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
        #[arg(long)]
        id: String,
        /// Action name or numeric code
        #[arg(long, value_parser = parse_action_type)]
        action_type: ActionType,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        category: String,
        /// Parameters as a JSON object
        #[arg(long, value_parser = parse_bag)]
        parameters: Option<DataBag>,
        /// Input as a JSON object
        #[arg(long, value_parser = parse_bag)]
        input: Option<DataBag>,
        /// Clause key this clause depends on (repeatable)
        #[arg(long = "depends-on", value_parser = parse_key)]
        dependencies: Vec<AssetKey>,
    },

    /// Add several clauses to a contract in one transaction
    AddClauses {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
        /// JSON array of `{id, actionType, parameters?, input?, dependencies?, ...}`
        #[arg(long, value_parser = parse_array)]
        clauses: Value,
    },

    /// Merge values into a clause's input
    AddInputs {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        /// Input as a JSON object
        #[arg(long, value_parser = parse_bag)]
        input: DataBag,
    },

    /// Set the evaluated date of a date-interval check
    AddEvaluatedDate {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        date: String,
    },

    /// Override the reference date of a date-interval check
    AddReferenceDate {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        date: String,
    },

    /// Supply fine calculation inputs
    AddFineInputs {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        reference_value: Option<f64>,
        #[arg(long)]
        daily_percentage: Option<f64>,
        #[arg(long)]
        days: Option<f64>,
        /// Take the days from a date check's result
        #[arg(long)]
        reference_clause_name: Option<String>,
    },

    /// Supply the stored value of a credit calculation
    AddStoredValue {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        value: f64,
    },

    /// Submit a payment
    AddPayment {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        date: String,
        #[arg(long)]
        payment: f64,
        #[arg(long)]
        final_payment: bool,
        #[arg(long)]
        receipt_hash: Option<String>,
        #[arg(long)]
        receipt_url: Option<String>,
        #[arg(long)]
        stripe_token: Option<String>,
        #[arg(long = "paypal-transaction-id")]
        pay_pal_transaction_id: Option<String>,
    },

    /// Replace a clause's dependencies
    SetDependencies {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long = "depends-on", value_parser = parse_key)]
        dependencies: Vec<AssetKey>,
    },

    /// Remove a clause from its contract
    RemoveClause {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
    },

    /// Attach the contract's review
    AddReview {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
        #[arg(long)]
        rating: f64,
        #[arg(long, default_value = "")]
        comments: String,
    },

    /// Replace the contract's participants
    AddParticipants {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
        #[arg(long = "participant", value_parser = parse_key)]
        participants: Vec<AssetKey>,
    },

    /// Cancel a contract through its finalization clause
    Cancel {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        /// Cancel unconditionally
        #[arg(long)]
        force: bool,
        /// Cancel if the cancellation condition holds
        #[arg(long)]
        requested: bool,
    },

    /// Create a clause template
    CreateTemplate {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Creator user key
        #[arg(long, value_parser = parse_key)]
        creator: AssetKey,
        #[arg(long)]
        public: bool,
    },

    /// Add a clause blueprint to a template
    CreateTemplateClause {
        #[arg(long, value_parser = parse_key)]
        template: AssetKey,
        #[arg(long)]
        id: String,
        #[arg(long, value_parser = parse_action_type)]
        action_type: ActionType,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        category: String,
        /// Position in the template; appended when absent
        #[arg(long)]
        number: Option<i64>,
        /// Default parameters as a JSON object
        #[arg(long, value_parser = parse_bag)]
        parameters: Option<DataBag>,
        /// Default input as a JSON object
        #[arg(long, value_parser = parse_bag)]
        input: Option<DataBag>,
        /// Template clause key this one depends on (repeatable)
        #[arg(long = "depends-on", value_parser = parse_key)]
        dependencies: Vec<AssetKey>,
        #[arg(long)]
        optional: bool,
    },

    /// Edit a template's name, description or visibility
    EditTemplate {
        #[arg(long, value_parser = parse_key)]
        template: AssetKey,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },

    /// Edit a template clause
    EditTemplateClause {
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        number: Option<i64>,
        #[arg(long, value_parser = parse_action_type)]
        action_type: Option<ActionType>,
        #[arg(long, value_parser = parse_bag)]
        parameters: Option<DataBag>,
        #[arg(long, value_parser = parse_bag)]
        input: Option<DataBag>,
        /// Replaces the dependency list (repeatable)
        #[arg(long = "depends-on", value_parser = parse_key)]
        dependencies: Vec<AssetKey>,
        /// Drop every dependency
        #[arg(long, conflicts_with = "dependencies")]
        no_dependencies: bool,
        #[arg(long)]
        optional: Option<bool>,
    },

    /// Delete a template and its clauses
    DeleteTemplate {
        #[arg(long, value_parser = parse_key)]
        template: AssetKey,
    },

    /// Remove a clause from a template
    DeleteTemplateClause {
        #[arg(long, value_parser = parse_key)]
        template: AssetKey,
        #[arg(long, value_parser = parse_key)]
        clause: AssetKey,
    },

    /// Copy a template and its clauses under a new id
    DuplicateTemplate {
        #[arg(long, value_parser = parse_key)]
        template: AssetKey,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// New creator user key
        #[arg(long, value_parser = parse_key)]
        creator: Option<AssetKey>,
    },

    /// Execute every runnable clause of a contract
    Execute {
        #[arg(long, value_parser = parse_key)]
        contract: AssetKey,
    },

    /// List contracts with clauses left to run
    Executable,

    /// Print a ledger asset
    Show {
        #[arg(value_parser = parse_key)]
        key: AssetKey,
    },

    /// Print every version of a ledger asset
    History {
        #[arg(value_parser = parse_key)]
        key: AssetKey,
    },

    /// List the supported action types and their fields
    Actions,

    /// Show version information
    Version,
}

impl Commands {
    /// Commands that never write
    fn is_read_only(&self) -> bool {
        matches!(
            self,
            Commands::Executable
                | Commands::Show { .. }
                | Commands::History { .. }
                | Commands::Actions
                | Commands::Version
        )
    }
}

// ── Argument parsers ──────────────────────────────────────

fn parse_key(raw: &str) -> Result<AssetKey, String> {
    AssetKey::from_value(&Value::String(raw.to_string())).map_err(|e| e.to_string())
}

fn parse_bag(raw: &str) -> Result<DataBag, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn parse_array(raw: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(array @ Value::Array(_)) => Ok(array),
        Ok(other) => Err(format!("expected a JSON array, got {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

fn parse_action_type(raw: &str) -> Result<ActionType, String> {
    let value = match raw.parse::<i64>() {
        Ok(code) => json!(code),
        Err(_) => json!(raw),
    };
    ActionType::parse(&value).map_err(|e| e.to_string())
}

// ── Outcome ───────────────────────────────────────────────

/// What a command produced: machine-readable value plus console lines
struct Reply {
    value: Value,
    lines: Vec<String>,
}

impl Reply {
    fn new(value: Value, line: impl Into<String>) -> Self {
        Reply {
            value,
            lines: vec![line.into()],
        }
    }
}

struct Failure {
    code: i32,
    status: u16,
    message: String,
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        let status = e.status();
        Failure {
            code: if e.is_client_error() { 1 } else { 2 },
            status,
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure {
            code: 2,
            status: 500,
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Error::from(e).into()
    }
}

// ── Main ──────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let exit_code = match run(&cli) {
        Ok(reply) => {
            if cli.json {
                println!("{}", render_json(&reply.value));
            } else {
                for line in reply.lines {
                    println!("{}", line);
                }
            }
            0
        }
        Err(failure) => {
            if cli.json {
                let body = json!({
                    "error": failure.message,
                    "status": failure.status,
                });
                println!("{}", render_json(&body));
            }
            eprintln!("{} {}", "error:".red().bold(), failure.message);
            failure.code
        }
    };

    process::exit(exit_code);
}

fn render_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn run(cli: &Cli) -> Result<Reply, Failure> {
    match &cli.command {
        Commands::Version => return Ok(version_reply()),
        Commands::Actions => return list_actions(),
        _ => {}
    }

    let store = FileLedger::new(&cli.ledger);
    let mut ledger = store.load()?;
    let reply = dispatch(&cli.command, &mut ledger)?;
    if !cli.command.is_read_only() {
        store.save(&ledger)?;
        tracing::info!(ledger = %store.path().display(), "transaction committed");
    }
    Ok(reply)
}

fn dispatch(command: &Commands, ledger: &mut MemoryLedger) -> Result<Reply, Failure> {
    let reply = match command {
        Commands::CreateUser { id, name } => {
            let record = transactions::create_user(ledger, id, name)?;
            let key = AssetKey::of_record(&record)?;
            Reply::new(
                Value::Object(record),
                format!("{} user {}", "created".green(), key.key.bold()),
            )
        }

        Commands::CreateContract {
            name,
            owner,
            signature_date,
            participants,
            data,
        } => {
            let contract = transactions::create_contract(
                ledger,
                NewContract {
                    name: name.clone(),
                    signature_date: signature_date.clone(),
                    owner: owner.clone(),
                    participants: participants.clone(),
                    data: data.clone().unwrap_or_default(),
                },
            )?;
            contract_reply(&contract, "created contract")?
        }

        Commands::AddClause {
            contract,
            id,
            action_type,
            description,
            category,
            parameters,
            input,
            dependencies,
        } => {
            let mut new = NewClause::new(id.clone(), *action_type);
            new.description = description.clone();
            new.category = category.clone();
            new.parameters = parameters.clone().unwrap_or_default();
            new.input = input.clone().unwrap_or_default();
            new.dependencies = dependencies.clone();
            let (_, clause) = transactions::add_clause(ledger, contract, new)?;
            Reply::new(
                serde_json::to_value(&clause)?,
                format!(
                    "{} clause {} [{}] {}",
                    "added".green(),
                    clause.id.bold(),
                    clause.action_type,
                    clause.key
                ),
            )
        }

        Commands::AddClauses { contract, clauses } => {
            let batch = clauses
                .as_array()
                .into_iter()
                .flatten()
                .map(NewClause::from_value)
                .collect::<Result<Vec<_>, Error>>()?;
            let updated = transactions::add_clauses(ledger, contract, batch)?;
            contract_reply(&updated, "added clauses to")?
        }

        Commands::AddInputs { clause, input } => {
            clause_reply(transactions::add_inputs_to_clause(ledger, clause, input.clone())?)?
        }
        Commands::AddEvaluatedDate { clause, date } => {
            clause_reply(transactions::add_evaluated_date(ledger, clause, date)?)?
        }
        Commands::AddReferenceDate { clause, date } => {
            clause_reply(transactions::add_reference_date(ledger, clause, date)?)?
        }
        Commands::AddFineInputs {
            clause,
            reference_value,
            daily_percentage,
            days,
            reference_clause_name,
        } => {
            let inputs = FineInputs {
                reference_value: *reference_value,
                daily_percentage: *daily_percentage,
                days: *days,
                reference_clause_days: reference_clause_name.as_ref().map(|_| true),
                reference_clause_name: reference_clause_name.clone(),
            };
            clause_reply(transactions::add_fine_inputs(ledger, clause, inputs)?)?
        }
        Commands::AddStoredValue { clause, value } => {
            clause_reply(transactions::add_stored_value(ledger, clause, *value)?)?
        }
        Commands::AddPayment {
            clause,
            date,
            payment,
            final_payment,
            receipt_hash,
            receipt_url,
            stripe_token,
            pay_pal_transaction_id,
        } => {
            let inputs = PaymentInputs {
                date: date.clone(),
                payment: *payment,
                final_payment: *final_payment,
                receipt_hash: receipt_hash.clone(),
                receipt_url: receipt_url.clone(),
                stripe_token: stripe_token.clone(),
                pay_pal_transaction_id: pay_pal_transaction_id.clone(),
            };
            clause_reply(transactions::add_payment_inputs(ledger, clause, inputs)?)?
        }

        Commands::SetDependencies {
            clause,
            dependencies,
        } => clause_reply(transactions::set_clause_dependencies(
            ledger,
            clause,
            dependencies.clone(),
        )?)?,

        Commands::RemoveClause { contract, clause } => {
            let updated = transactions::remove_clause(ledger, contract, clause)?;
            contract_reply(&updated, "removed clause from")?
        }

        Commands::AddReview {
            contract,
            rating,
            comments,
        } => {
            let updated = transactions::add_review_to_contract(ledger, contract, *rating, comments)?;
            contract_reply(&updated, "reviewed contract")?
        }

        Commands::AddParticipants {
            contract,
            participants,
        } => {
            let updated = transactions::add_participants(ledger, contract, participants.clone())?;
            contract_reply(&updated, "updated participants of")?
        }

        Commands::Cancel {
            clause,
            force,
            requested,
        } => {
            let cancellation = Cancellation::from_flags(*force, *requested)?;
            report_reply(transactions::cancel_contract(ledger, clause, cancellation)?)?
        }

        Commands::CreateTemplate {
            id,
            name,
            description,
            creator,
            public,
        } => {
            let created = templates::create_template(
                ledger,
                NewTemplate {
                    id: id.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    creator: creator.clone(),
                    public: *public,
                },
            )?;
            template_reply(&created, "created template")?
        }

        Commands::CreateTemplateClause {
            template,
            id,
            action_type,
            name,
            description,
            category,
            number,
            parameters,
            input,
            dependencies,
            optional,
        } => {
            let mut new = NewTemplateClause::new(id.clone(), *action_type);
            new.name = name.clone();
            new.description = description.clone();
            new.category = category.clone();
            new.number = *number;
            new.default_parameters = parameters.clone().unwrap_or_default();
            new.default_inputs = input.clone().unwrap_or_default();
            new.dependencies = dependencies.clone();
            new.optional = *optional;
            let (_, clause) = templates::create_template_clause(ledger, template, new)?;
            Reply::new(
                serde_json::to_value(&clause)?,
                format!(
                    "{} template clause {} [{}] {}",
                    "added".green(),
                    clause.id.bold(),
                    clause.action_type,
                    clause.key
                ),
            )
        }

        Commands::EditTemplate {
            template,
            name,
            description,
            public,
        } => {
            let edit = TemplateEdit {
                name: name.clone(),
                description: description.clone(),
                public: *public,
            };
            template_reply(&templates::edit_template(ledger, template, edit)?, "edited template")?
        }

        Commands::EditTemplateClause {
            clause,
            name,
            description,
            category,
            number,
            action_type,
            parameters,
            input,
            dependencies,
            no_dependencies,
            optional,
        } => {
            let dependencies = if *no_dependencies {
                Some(Vec::new())
            } else if dependencies.is_empty() {
                None
            } else {
                Some(dependencies.clone())
            };
            let edit = TemplateClauseEdit {
                name: name.clone(),
                description: description.clone(),
                category: category.clone(),
                number: *number,
                action_type: *action_type,
                default_parameters: parameters.clone(),
                default_inputs: input.clone(),
                dependencies,
                optional: *optional,
            };
            let edited = templates::edit_template_clause(ledger, clause, edit)?;
            Reply::new(
                serde_json::to_value(&edited)?,
                format!("{} template clause {}", "edited".green(), edited.id.bold()),
            )
        }

        Commands::DeleteTemplate { template } => {
            let deleted = templates::delete_template(ledger, template)?;
            Reply::new(
                json!({
                    "message": "Template successfully deleted",
                    "id": deleted.id,
                    "name": deleted.name,
                }),
                format!(
                    "{} template {} with {} clause(s)",
                    "deleted".red(),
                    deleted.name.bold(),
                    deleted.clauses.len()
                ),
            )
        }

        Commands::DeleteTemplateClause { template, clause } => {
            let updated = templates::delete_template_clause(ledger, template, clause)?;
            template_reply(&updated, "removed clause from template")?
        }

        Commands::DuplicateTemplate {
            template,
            id,
            name,
            creator,
        } => {
            let copy = TemplateCopy {
                id: id.clone(),
                name: name.clone(),
                creator: creator.clone(),
            };
            let duplicated = templates::duplicate_template(ledger, template, copy)?;
            template_reply(&duplicated, "duplicated template as")?
        }

        Commands::Execute { contract } => {
            report_reply(transactions::execute_contract(ledger, contract)?)?
        }

        Commands::Executable => {
            let contracts = transactions::contracts_with_executable_clauses(ledger)?;
            let mut lines: Vec<String> = contracts
                .iter()
                .map(|c| format!("{}  {}", c.key, c.name.bold()))
                .collect();
            if lines.is_empty() {
                lines.push("no contract has clauses left to run".dimmed().to_string());
            }
            Reply {
                value: serde_json::to_value(&contracts)?,
                lines,
            }
        }

        Commands::Show { key } => {
            let record = Value::Object(ledger.get(key)?);
            let pretty = render_json(&record);
            Reply::new(record, pretty)
        }

        Commands::History { key } => {
            let versions = ledger.history(key)?;
            let lines = versions
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let marker = if v.contains_key("@deleted") {
                        "deleted".red().to_string()
                    } else {
                        format!("v{}", i + 1)
                    };
                    format!("{} {}", marker, Value::Object(v.clone()))
                })
                .collect();
            Reply {
                value: Value::Array(versions.into_iter().map(Value::Object).collect()),
                lines,
            }
        }

        Commands::Actions => list_actions()?,
        Commands::Version => version_reply(),
    };
    Ok(reply)
}

// ── Rendering ─────────────────────────────────────────────

fn contract_reply(contract: &Contract, verb: &str) -> Result<Reply, Failure> {
    Ok(Reply::new(
        serde_json::to_value(contract)?,
        format!(
            "{} {} {} ({} clause(s))",
            verb.green(),
            contract.name.bold(),
            contract.key,
            contract.clauses.len()
        ),
    ))
}

fn template_reply(template: &Template, verb: &str) -> Result<Reply, Failure> {
    Ok(Reply::new(
        serde_json::to_value(template)?,
        format!(
            "{} {} {} ({} clause(s))",
            verb.green(),
            template.name.bold(),
            template.key,
            template.clauses.len()
        ),
    ))
}

fn clause_reply(clause: Clause) -> Result<Reply, Failure> {
    let fields: Vec<&str> = clause.input.keys().map(String::as_str).collect();
    let line = format!(
        "{} clause {} input: {}",
        "updated".green(),
        clause.id.bold(),
        fields.join(", ")
    );
    Ok(Reply::new(serde_json::to_value(&clause)?, line))
}

fn report_reply(report: ExecutionReport) -> Result<Reply, Failure> {
    let mut lines = vec![format!(
        "contract {} ({}): {} clause(s) ran",
        report.contract.name.bold(),
        report.contract.key,
        report.executions.len()
    )];
    for execution in &report.executions {
        let state = match (execution.finalized, execution.success) {
            (true, true) => "finalized".green(),
            (true, false) => "failed".red(),
            (false, _) => "pending".yellow(),
        };
        lines.push(format!(
            "  {}  {} [{}] {}",
            state,
            execution.id.bold(),
            execution.action_type,
            execution.feedback
        ));
    }
    if let Some(status) = report.contract.data.get(actions::finalize::STATUS_KEY) {
        lines.push(format!("contract status: {}", status.to_string().bold()));
    }
    Ok(Reply {
        value: serde_json::to_value(&report)?,
        lines,
    })
}

fn version_reply() -> Reply {
    let version = env!("CARGO_PKG_VERSION");
    Reply::new(
        json!({"name": "clausia", "version": version}),
        format!("clausia {}", version),
    )
}

fn list_actions() -> Result<Reply, Failure> {
    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for action_type in ActionType::ALL {
        let (parameters, input): (Shape, Shape) = match actions::get(action_type) {
            Some(handler) => (handler.parameter_shape(), handler.input_shape()),
            None => (&[], &[]),
        };
        let tags = |shape: Shape| -> Vec<&'static str> { shape.iter().map(|f| f.tag).collect() };
        lines.push(format!(
            "{:>2}  {}  parameters: [{}]  input: [{}]",
            action_type.code(),
            action_type.name().bold(),
            tags(parameters).join(", "),
            tags(input).join(", ")
        ));
        rows.push(json!({
            "code": action_type.code(),
            "name": action_type.name(),
            "parameters": parameters,
            "input": input,
        }));
    }
    Ok(Reply {
        value: Value::Array(rows),
        lines,
    })
}
