//! Identity commands - Protected fields, role changes and deletion

use clap::{Args, ValueEnum};
use serde::Serialize;

use labsync_db::RoleProfile;
use labsync_reconcile::{PiProfileInput, RoleAssignment, StudentProfileInput, SyncField};

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{CliError, CliResult};
use crate::output::{print_json, print_key_value, print_success};

/// Arguments for the protected command
#[derive(Args)]
pub struct ProtectedArgs {
    /// External id of the identity
    pub external_id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Role that can be assigned from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Pi,
    Student,
}

/// Arguments for the assign-role command
#[derive(Args)]
pub struct AssignRoleArgs {
    /// External id of the identity
    pub external_id: String,

    /// Role to assign
    #[arg(long, value_enum)]
    pub role: RoleArg,

    /// External id of the supervising PI (students only)
    #[arg(long)]
    pub pi: Option<String>,

    /// Department (PIs only)
    #[arg(long)]
    pub department: Option<String>,

    /// Lab name (PIs only)
    #[arg(long)]
    pub lab_name: Option<String>,

    /// Academic program (students only)
    #[arg(long)]
    pub academic_program: Option<String>,

    /// Enrollment status (students only)
    #[arg(long)]
    pub enrollment_status: Option<String>,
}

/// Arguments for the unassign-role command
#[derive(Args)]
pub struct UnassignRoleArgs {
    /// External id of the identity
    pub external_id: String,
}

/// Arguments for the delete-identity command
#[derive(Args)]
pub struct DeleteIdentityArgs {
    /// External id of the identity
    pub external_id: String,

    /// Confirm the deletion
    #[arg(long)]
    pub yes: bool,
}

#[derive(Serialize)]
struct ProtectedOutput<'a> {
    external_id: &'a str,
    protected: Vec<&'static str>,
    unprotected: Vec<&'static str>,
}

/// Execute the protected command
pub async fn execute_protected(args: ProtectedArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", false).await?;
    let protected = ctx
        .coordinator
        .get_protected_fields(&args.external_id)
        .await?;

    let output = ProtectedOutput {
        external_id: &args.external_id,
        protected: protected.names(),
        unprotected: SyncField::ALL
            .into_iter()
            .filter(|f| f.is_locally_owned() && !protected.contains(*f))
            .map(SyncField::as_str)
            .collect(),
    };

    if args.json {
        return print_json(&output);
    }
    print_key_value("Identity", output.external_id);
    print_key_value("Protected", &join_or_none(&output.protected));
    print_key_value("Directory may fill", &join_or_none(&output.unprotected));
    Ok(())
}

/// Execute the assign-role command
pub async fn execute_assign(args: AssignRoleArgs, config: &Config) -> CliResult<()> {
    let assignment = assignment_from(&args)?;
    let ctx = AppContext::new(config, "cli", false).await?;

    let assignment = match assignment {
        Pending::Pi(input) => RoleAssignment::Pi(input),
        Pending::Student { pi, input } => {
            let pi_identity_id = match pi {
                Some(external_id) => Some(ctx.identity_id(&external_id).await?),
                None => None,
            };
            RoleAssignment::Student(StudentProfileInput {
                pi_identity_id,
                ..input
            })
        }
    };

    let id = ctx.identity_id(&args.external_id).await?;
    let profile = ctx.coordinator.assign_role(id, assignment).await?;

    let role = match profile {
        RoleProfile::Pi(_) => "pi",
        RoleProfile::Student(_) => "student",
    };
    print_success(&format!("{} is now {role}", args.external_id));
    print_key_value("Profile", &profile.profile_id().to_string());
    Ok(())
}

/// Execute the unassign-role command
pub async fn execute_unassign(args: UnassignRoleArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", false).await?;
    let id = ctx.identity_id(&args.external_id).await?;
    let summary = ctx.coordinator.unassign_role(id).await?;

    print_success(&format!(
        "{} is unassigned (was {})",
        args.external_id, summary.previous_role
    ));
    if summary.students_detached > 0 {
        print_key_value("Students detached", &summary.students_detached.to_string());
    }
    if !summary.students_reset.is_empty() {
        print_key_value("Students reset", &summary.students_reset.len().to_string());
    }
    Ok(())
}

/// Execute the delete-identity command
pub async fn execute_delete(args: DeleteIdentityArgs, config: &Config) -> CliResult<()> {
    if !args.yes {
        return Err(CliError::Validation(
            "deleting an identity cannot be undone; pass --yes to confirm".to_string(),
        ));
    }
    let ctx = AppContext::new(config, "cli", false).await?;
    let id = ctx.identity_id(&args.external_id).await?;
    let summary = ctx.coordinator.delete_identity(id).await?;

    print_success(&format!("Deleted {} ({})", summary.external_id, summary.role));
    print_key_value("Requests removed", &summary.requests_removed.to_string());
    if summary.students_detached > 0 {
        print_key_value("Students detached", &summary.students_detached.to_string());
    }
    if !summary.students_reset.is_empty() {
        print_key_value("Students reset", &summary.students_reset.len().to_string());
    }
    Ok(())
}

/// Role input before the PI's external id is resolved.
#[derive(Debug, PartialEq, Eq)]
enum Pending {
    Pi(PiProfileInput),
    Student {
        pi: Option<String>,
        input: StudentProfileInput,
    },
}

fn assignment_from(args: &AssignRoleArgs) -> CliResult<Pending> {
    match args.role {
        RoleArg::Pi => {
            if args.pi.is_some() || args.academic_program.is_some() || args.enrollment_status.is_some()
            {
                return Err(CliError::Validation(
                    "--pi, --academic-program and --enrollment-status apply to students only"
                        .to_string(),
                ));
            }
            Ok(Pending::Pi(PiProfileInput {
                department: args.department.clone(),
                lab_name: args.lab_name.clone(),
            }))
        }
        RoleArg::Student => {
            if args.department.is_some() || args.lab_name.is_some() {
                return Err(CliError::Validation(
                    "--department and --lab-name apply to PIs only".to_string(),
                ));
            }
            Ok(Pending::Student {
                pi: args.pi.clone(),
                input: StudentProfileInput {
                    pi_identity_id: None,
                    academic_program: args.academic_program.clone(),
                    enrollment_status: args.enrollment_status.clone(),
                },
            })
        }
    }
}

fn join_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
