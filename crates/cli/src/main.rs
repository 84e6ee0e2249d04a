use clap::{Args, Parser, Subcommand};
use lims_core::calculator::{absolute_count_from_text, estimated_filtration_rate};
use lims_core::config::{letterhead_from_env_values, resolve_data_dir};
use lims_core::constants::{ADULT_AGE_YEARS, NOT_COMPUTABLE};
use lims_core::panel::parse_panel_list;
use lims_core::report::markdown::render_report;
use lims_core::store::{FileOrderBook, FileResultStore};
use lims_core::{
    Age, FiltrationStage, Gender, LabConfig, LabService, NonEmptyText, Operator, OperatorRole,
    Order, OrderId, PanelType, Patient, PrintRequest, RawValues, ReferenceRangeCatalog,
    Registration, Salutation,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lims")]
#[command(about = "Laboratory result capture and reporting CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// The acting operator.
#[derive(Args)]
struct OperatorArgs {
    /// Operator name
    #[arg(long = "operator")]
    name: String,
    /// Operator role (admin, billing, technician, satellite)
    #[arg(long, default_value = "technician")]
    role: OperatorRole,
    /// Professional registration, e.g. "SLMC 4471"
    #[arg(long)]
    registration: Option<Registration>,
}

impl OperatorArgs {
    fn operator(self) -> Result<Operator, lims_core::LabError> {
        let operator = Operator::new(self.name, self.role)?;
        Ok(match self.registration {
            Some(registration) => operator.with_registration(registration),
            None => operator,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show reference ranges for a panel and patient
    Ranges {
        /// Panel name (e.g. full-blood-count, FBC)
        panel: PanelType,
        /// Age in years
        age: u32,
        /// Gender (male or female)
        gender: Gender,
    },
    /// Estimate GFR from serum creatinine
    Egfr {
        /// Serum creatinine (mg/dL)
        creatinine: f64,
        /// Age in years
        age: u32,
        /// Gender (male or female)
        gender: Gender,
    },
    /// Show the kidney function stage for an eGFR value
    Stage {
        /// eGFR (mL/min/1.73m²)
        egfr: f64,
    },
    /// Convert a differential percentage into an absolute count
    AbsoluteCount {
        /// Percentage
        percentage: String,
        /// Total white cell count
        total: String,
    },
    /// Validate a reference range catalog file
    CheckCatalog {
        /// Catalog YAML (defaults to the built-in catalog)
        path: Option<PathBuf>,
    },
    /// Register an order
    OrderCreate {
        /// Salutation (Mr, Mrs, Mast, Miss, Baby, Baby of Mrs, Rev)
        salutation: Salutation,
        /// Patient name
        name: String,
        /// Age, e.g. "34" or "2Y 6M"
        age: Age,
        /// Gender (male or female)
        gender: Gender,
        /// Comma-separated panels, e.g. "FBC, serum-creatinine"
        panels: String,
        /// Referring doctor (defaults to Self)
        #[arg(long)]
        referred_by: Option<String>,
        /// Patient contact number
        #[arg(long)]
        contact: Option<String>,
        /// Order reference (generated if omitted)
        #[arg(long)]
        id: Option<OrderId>,
    },
    /// List orders
    Orders,
    /// Capture results for a panel
    Capture {
        /// Order reference
        order_id: OrderId,
        /// Panel name
        panel: PanelType,
        /// Values as "Parameter=value"
        #[arg(required = true)]
        values: Vec<String>,
        /// Free-text comment
        #[arg(long)]
        comment: Option<String>,
        #[command(flatten)]
        operator: OperatorArgs,
    },
    /// Authorize a captured panel
    Authorize {
        /// Order reference
        order_id: OrderId,
        /// Panel name
        panel: PanelType,
        #[command(flatten)]
        operator: OperatorArgs,
    },
    /// Show order status and per-panel state
    Status {
        /// Order reference
        order_id: OrderId,
    },
    /// Print authorized results as Markdown
    Print {
        /// Order reference
        order_id: OrderId,
        /// Panels to print (repeatable); all ordered panels if omitted
        #[arg(long = "panel")]
        panels: Vec<PanelType>,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

type FileLabService = LabService<FileOrderBook, FileResultStore>;

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn lab_service() -> Result<FileLabService, Box<dyn std::error::Error>> {
    let catalog_path = env_value("LIMS_CATALOG_PATH").map(PathBuf::from);
    let catalog = ReferenceRangeCatalog::load_or_builtin(catalog_path.as_deref())?;

    let letterhead = letterhead_from_env_values(
        env_value("LIMS_LAB_NAME"),
        env_value("LIMS_LAB_ADDRESS"),
        env_value("LIMS_LAB_CONTACT"),
    );
    let data_dir = resolve_data_dir(env_value("LIMS_DATA_DIR").map(PathBuf::from));
    let config = LabConfig::new(data_dir, letterhead)?;

    let orders = FileOrderBook::new(config.orders_dir());
    let results = FileResultStore::new(config.results_dir());
    Ok(LabService::new(
        Arc::new(catalog),
        Arc::new(config),
        orders,
        results,
    ))
}

fn parse_values(values: &[String]) -> Result<RawValues, String> {
    values
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.to_string()))
                .ok_or_else(|| format!("expected Parameter=value, got '{pair}'"))
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Ranges { panel, age, gender }) => {
            let catalog = ReferenceRangeCatalog::builtin()?;
            match catalog.resolve(panel, age, gender) {
                Ok(specs) => {
                    for spec in specs {
                        let range = spec
                            .reference
                            .map(|r| r.normal)
                            .unwrap_or_default();
                        println!(
                            "{:<28} {:<10} {}",
                            spec.name,
                            spec.unit.unwrap_or_default(),
                            range
                        );
                    }
                }
                Err(e) => eprintln!("Error resolving ranges: {}", e),
            }
        }
        Some(Commands::Egfr {
            creatinine,
            age,
            gender,
        }) => {
            if age < ADULT_AGE_YEARS || creatinine <= 0.0 {
                eprintln!(
                    "eGFR requires creatinine > 0 and age >= {}",
                    ADULT_AGE_YEARS
                );
            } else {
                let egfr = estimated_filtration_rate(creatinine, age, gender);
                println!("eGFR: {:.1} mL/min/1.73m²", egfr);
                println!("Stage: {}", FiltrationStage::for_rate(egfr));
            }
        }
        Some(Commands::Stage { egfr }) => {
            println!("{}", FiltrationStage::for_rate(egfr));
        }
        Some(Commands::AbsoluteCount { percentage, total }) => {
            match absolute_count_from_text(&percentage, &total) {
                Some(count) => println!("{}", count),
                None => println!("{}", NOT_COMPUTABLE),
            }
        }
        Some(Commands::CheckCatalog { path }) => {
            match ReferenceRangeCatalog::load_or_builtin(path.as_deref()) {
                Ok(catalog) => {
                    for panel in catalog.panels() {
                        println!(
                            "{}: {} parameters ({})",
                            panel.panel,
                            panel.parameters.len(),
                            panel.title
                        );
                    }
                    println!("Catalog OK");
                }
                Err(e) => eprintln!("Catalog invalid: {}", e),
            }
        }
        Some(Commands::OrderCreate {
            salutation,
            name,
            age,
            gender,
            panels,
            referred_by,
            contact,
            id,
        }) => {
            let service = lab_service()?;
            let order = parse_panel_list(&panels).and_then(|panels| {
                Order::new(
                    id.unwrap_or_else(OrderId::generate),
                    Patient {
                        salutation,
                        name: NonEmptyText::new(&name)?,
                        age,
                        gender,
                        contact: contact.filter(|c| !c.trim().is_empty()),
                    },
                    referred_by,
                    panels,
                    chrono::Local::now().date_naive(),
                )
            });
            match order.and_then(|order| service.orders().insert(&order).map(|()| order)) {
                Ok(order) => println!("Created order {}", order.id),
                Err(e) => eprintln!("Error creating order: {}", e),
            }
        }
        Some(Commands::Orders) => {
            let service = lab_service()?;
            match service.orders().list() {
                Ok(orders) if orders.is_empty() => println!("No orders found."),
                Ok(orders) => {
                    for order in orders {
                        let panels: Vec<&str> = order.panels.iter().map(|p| p.as_str()).collect();
                        println!(
                            "{}: {} ({}, {}), Panels: {}, Status: {}",
                            order.id,
                            order.patient.display_name(),
                            order.patient.age,
                            order.patient.gender,
                            panels.join(", "),
                            order.status
                        );
                    }
                }
                Err(e) => eprintln!("Error listing orders: {}", e),
            }
        }
        Some(Commands::Capture {
            order_id,
            panel,
            values,
            comment,
            operator,
        }) => {
            let service = lab_service()?;
            let raw = parse_values(&values)?;
            let operator = operator.operator()?;
            match service.capture_result(&order_id, panel, &raw, comment, &operator) {
                Ok(record) => println!(
                    "Captured {} values for {} on {}",
                    record.values.len(),
                    panel,
                    order_id
                ),
                Err(e) => eprintln!("Error capturing results: {}", e),
            }
        }
        Some(Commands::Authorize {
            order_id,
            panel,
            operator,
        }) => {
            let service = lab_service()?;
            let operator = operator.operator()?;
            match service.authorize(&order_id, panel, &operator) {
                Ok(outcome) => println!(
                    "Authorized {} on {}; order is now {}",
                    panel, order_id, outcome.order_status
                ),
                Err(e) => eprintln!("Error authorizing results: {}", e),
            }
        }
        Some(Commands::Status { order_id }) => {
            let service = lab_service()?;
            match service.progress(&order_id) {
                Ok(progress) => {
                    println!("{}: {}", progress.order_id, progress.status);
                    for panel in progress.panels {
                        println!("  {:<20} {}", panel.panel.as_str(), panel.state);
                    }
                }
                Err(e) => eprintln!("Error reading status: {}", e),
            }
        }
        Some(Commands::Print {
            order_id,
            panels,
            output,
        }) => {
            let service = lab_service()?;
            let request = match panels.as_slice() {
                [] => PrintRequest::Bulk,
                [panel] => PrintRequest::Single(*panel),
                _ => PrintRequest::Panels(panels),
            };
            match service.compose(&order_id, &request) {
                Ok(report) => {
                    let rendered = render_report(&report);
                    match output {
                        Some(path) => {
                            std::fs::write(&path, rendered)?;
                            println!(
                                "Wrote {} document(s) to {}",
                                report.documents.len(),
                                path.display()
                            );
                        }
                        None => print!("{}", rendered),
                    }
                }
                Err(e) => eprintln!("Error printing report: {}", e),
            }
        }
        None => {
            println!("Use 'lims --help' for commands");
        }
    }

    Ok(())
}
