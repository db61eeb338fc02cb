use crate::infra::FileCertificateRenderer;
use clap::Args;
use clearance::auth::{Authenticator, Principal};
use clearance::config::AuthConfig;
use clearance::error::AppError;
use clearance::workflows::clearance::{
    CertificateOutcome, ClearanceError, ClearanceService, Decision, Department,
    InMemoryClearanceStore, NewObligation, NewStaff, NewStudent, NotificationDispatcher,
    NotificationHub, ObligationKind, QueuedPublisher, RequestId, Role, StudentId,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_PASSWORD: &str = "graduation-2026";

type DemoService = ClearanceService<InMemoryClearanceStore, QueuedPublisher, FileCertificateRenderer>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Student identifier used for the walkthrough
    #[arg(long, default_value = "U2026-001")]
    pub(crate) student_id: String,
    /// Directory the issued certificate is written to
    #[arg(long, default_value = "certificates/demo")]
    pub(crate) certificate_dir: PathBuf,
    /// Optional obligations CSV (student_id,department,kind,description,amount) to load first
    #[arg(long)]
    pub(crate) obligations_csv: Option<PathBuf>,
    /// Let finance approve while the fee is still outstanding instead of waiting for payment
    #[arg(long)]
    pub(crate) override_finance: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let store = Arc::new(InMemoryClearanceStore::default());
    let (publisher, mut events) = QueuedPublisher::channel();
    let renderer = Arc::new(FileCertificateRenderer::new(args.certificate_dir.clone()));
    let authenticator = Authenticator::new(&AuthConfig::for_tests())?;
    let service = ClearanceService::new(store.clone(), Arc::new(publisher), renderer, authenticator);

    println!("Graduation clearance demo");

    service.bootstrap_admin("Demo Registrar", "registrar@uni.test", DEMO_PASSWORD)?;
    let admin = service.login("registrar@uni.test", DEMO_PASSWORD)?.principal;

    let mut officers = BTreeMap::new();
    for department in Department::ALL {
        let email = format!("{}@uni.test", department.as_str());
        service.register_staff(
            &admin,
            NewStaff {
                name: format!("{} Officer", department.label()),
                email: email.clone(),
                password: DEMO_PASSWORD.to_string(),
                role: Role::Staff,
                department: Some(department),
            },
        )?;
        officers.insert(department, service.login(&email, DEMO_PASSWORD)?.principal);
    }

    let student_id = StudentId(args.student_id.clone());
    service.register_student(
        &admin,
        NewStudent {
            id: student_id.clone(),
            name: "Amara Okafor".to_string(),
            email: "amara.okafor@uni.test".to_string(),
            password: DEMO_PASSWORD.to_string(),
        },
    )?;
    let student = service.login(&student_id.0, DEMO_PASSWORD)?.principal;
    println!("Registered student {} and {} department officers", student_id, officers.len());

    if let Some(path) = &args.obligations_csv {
        let summary = service.import_obligations(&admin, File::open(path)?)?;
        println!(
            "Imported {} obligations from {} ({} rows skipped)",
            summary.created.len(),
            path.display(),
            summary.skipped.len()
        );
        for skip in &summary.skipped {
            println!("  line {}: {}", skip.line, skip.reason);
        }
    }

    let finance = officer(&officers, Department::Finance)?;
    let fee = service.add_obligation(
        finance,
        NewObligation {
            student_id: student_id.clone(),
            department: Department::Finance,
            kind: ObligationKind::Fee,
            description: "Final semester tuition balance".to_string(),
            amount: 5_000,
        },
    )?;
    println!("Finance recorded '{}' ({} minor units)", fee.description, fee.amount);

    let mut requests: BTreeMap<Department, RequestId> = BTreeMap::new();
    for department in Department::ALL {
        let outcome = service.submit_request(&student, &student_id, department)?;
        requests.insert(department, outcome.request.id);
    }
    println!("Submitted {} clearance requests", requests.len());

    for (department, request_id) in &requests {
        if *department == Department::Finance {
            continue;
        }
        let outcome = service.decide_request(
            officer(&officers, *department)?,
            request_id,
            Decision::Approved,
            None,
        )?;
        println!(
            "  {:<20} approved, overall {}",
            department.label(),
            outcome.aggregate.overall.label()
        );
    }

    print_status(&service, &student, &student_id)?;

    let first_request = requests
        .remove(&Department::Finance)
        .ok_or_else(|| ClearanceError::not_found("request", Department::Finance.as_str()))?;

    let finance_request = if args.override_finance {
        println!("Finance approves despite the outstanding fee");
        first_request
    } else {
        service.decide_request(
            finance,
            &first_request,
            Decision::Rejected,
            Some("tuition balance outstanding".to_string()),
        )?;
        println!("Finance rejected the request: tuition balance outstanding");

        service.resolve_obligation(finance, &fee.id)?;
        println!("Fee paid and marked resolved; student resubmits");
        service
            .submit_request(&student, &student_id, Department::Finance)?
            .request
            .id
    };

    let outcome = service.decide_request(
        finance,
        &finance_request,
        Decision::Approved,
        Some("cleared by bursary".to_string()),
    )?;
    println!(
        "  {:<20} approved, overall {}",
        Department::Finance.label(),
        outcome.aggregate.overall.label()
    );

    match outcome.aggregate.certificate {
        CertificateOutcome::Issued { artifact } => {
            println!("Certificate issued: {}", artifact.reference)
        }
        CertificateOutcome::AlreadyIssued => println!("Certificate already issued"),
        CertificateOutcome::Failed { reason } => {
            println!("Certificate generation failed ({reason}); retry via the certificate route")
        }
        CertificateOutcome::NotEligible => println!("Certificate not yet available"),
    }

    print_status(&service, &student, &student_id)?;

    drop(service);
    let dispatcher = NotificationDispatcher::new(store, NotificationHub::default());
    let mut delivered = 0;
    while let Ok(event) = events.try_recv() {
        delivered += dispatcher.dispatch(&event).len();
    }
    println!("Notifications delivered: {delivered}");

    Ok(())
}

fn officer(
    officers: &BTreeMap<Department, Principal>,
    department: Department,
) -> Result<&Principal, ClearanceError> {
    officers
        .get(&department)
        .ok_or_else(|| ClearanceError::not_found("staff", department.as_str()))
}

fn print_status(
    service: &DemoService,
    student: &Principal,
    student_id: &StudentId,
) -> Result<(), AppError> {
    let view = service.clearance_status(student, student_id)?;
    println!("\nStatus for {} ({}): {}", view.name, view.student_id, view.overall.label());
    for assessment in &view.departments {
        println!(
            "  {:<20} {:<9} blocking obligations: {}",
            assessment.department.label(),
            assessment.status.label(),
            assessment.blocking.len()
        );
    }
    println!();
    Ok(())
}
