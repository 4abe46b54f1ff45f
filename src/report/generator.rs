//! Markdown and JSON rendering of report documents.

use super::{ReportDocument, Subject};
use crate::analysis::{group_by_verdict, FraudSummary};
use crate::models::{Agent, Execution, FraudReport, FraudVerdict, UserStatistics};
use anyhow::Result;

/// Generate a complete Markdown report. Missing fields show `placeholder`.
pub fn generate_markdown_report(document: &ReportDocument, placeholder: &str) -> String {
    let mut output = String::new();

    output.push_str("# OptiAgent Fraud Report\n\n");
    output.push_str(&generate_subject_section(document));
    output.push_str(&generate_summary_section(&document.summary));

    if let Subject::User { statistics, .. } = &document.subject {
        output.push_str(&generate_statistics_section(statistics));
    }

    output.push_str(&generate_invoices_section(&document.reports, placeholder));
    output.push_str(&generate_footer());

    output
}

fn generate_subject_section(document: &ReportDocument) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    match &document.subject {
        Subject::Execution { execution, agent } => {
            if let Some(agent) = agent {
                section.push_str(&agent_line(agent));
            }
            section.push_str(&execution_lines(execution));
        }
        Subject::Agent { agent, executions } => {
            section.push_str(&agent_line(agent));
            section.push_str(&format!("- **Executions:** {}\n", executions.len()));
            if let Some(latest) = executions.first() {
                section.push_str(&format!(
                    "- **Latest Execution:** `{}` ({})\n",
                    latest.id, latest.status
                ));
            }
        }
        Subject::User { user, agents, .. } => {
            section.push_str(&format!("- **User:** {} <{}>\n", user.name, user.email));
            section.push_str(&format!("- **Agents:** {}\n", agents.len()));
        }
    }
    section.push_str(&format!(
        "- **Generated:** {}\n\n",
        document.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    section
}

fn agent_line(agent: &Agent) -> String {
    format!("- **Agent:** {} ({}) `{}`\n", agent.name, agent.role, agent.id)
}

fn execution_lines(execution: &Execution) -> String {
    let mut lines = String::new();

    lines.push_str(&format!("- **Execution:** `{}`\n", execution.id));
    lines.push_str(&format!("- **Status:** {}\n", execution.status));
    lines.push_str(&format!(
        "- **Started:** {}\n",
        execution.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(end) = execution.end_time {
        lines.push_str(&format!("- **Ended:** {}\n", end.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(duration) = execution.duration() {
        lines.push_str(&format!(
            "- **Duration:** {:.1}s\n",
            duration.num_milliseconds() as f64 / 1000.0
        ));
    }
    if let Some(notes) = execution.notes.as_deref().filter(|n| !n.is_empty()) {
        lines.push_str(&format!("- **Notes:** {}\n", notes));
    }

    lines
}

fn generate_summary_section(summary: &FraudSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Flagged | Cleared | Unknown | **Total** |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        summary.flagged, summary.cleared, summary.unknown, summary.total
    ));

    if summary.flagged > 0 {
        section.push_str(&format!(
            "**Flagged amount:** {:.2}\n\n",
            summary.flagged_amount
        ));
    }

    let reasons = summary.top_reasons(10);
    if !reasons.is_empty() {
        section.push_str("### Fraud Reasons\n\n");
        section.push_str("| Reason | Count |\n");
        section.push_str("|:---|:---:|\n");
        for (reason, count) in reasons {
            section.push_str(&format!("| {} | {} |\n", cell(&reason), count));
        }
        section.push('\n');
    }

    if !summary.by_city.is_empty() {
        section.push_str("### Invoices by City\n\n");
        section.push_str("| City | Invoices |\n");
        section.push_str("|:---|:---:|\n");

        let mut cities: Vec<_> = summary.by_city.iter().collect();
        cities.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (city, count) in cities {
            section.push_str(&format!("| {} | {} |\n", cell(city), count));
        }
        section.push('\n');
    }

    section
}

fn generate_statistics_section(stats: &UserStatistics) -> String {
    let mut section = String::new();

    section.push_str("## Statistics\n\n");
    section.push_str(&format!("- **Agents:** {}\n", stats.total_agents));
    section.push_str(&format!("- **Executions:** {}\n", stats.total_executions));
    section.push_str(&format!("- **Successful:** {}\n", stats.successful_executions));
    section.push_str(&format!("- **Failed:** {}\n", stats.failed_executions));
    section.push_str(&format!("- **Pending:** {}\n", stats.pending_executions()));
    if let Some(rate) = stats.success_rate() {
        section.push_str(&format!("- **Success Rate:** {:.1}%\n", rate));
    }
    section.push('\n');

    section
}

fn generate_invoices_section(reports: &[FraudReport], placeholder: &str) -> String {
    let mut section = String::new();

    section.push_str("## Invoices\n\n");

    if reports.is_empty() {
        section.push_str("No analysis results have been recorded yet.\n\n");
        return section;
    }

    // Flagged invoices first
    let grouped = group_by_verdict(reports);
    for verdict in [FraudVerdict::Yes, FraudVerdict::Unknown, FraudVerdict::No] {
        for report in grouped.get(&verdict).into_iter().flatten() {
            section.push_str(&generate_invoice_block(report, placeholder));
        }
    }

    section
}

/// Render one fraud report.
fn generate_invoice_block(report: &FraudReport, placeholder: &str) -> String {
    let mut block = String::new();
    let fields = report.fields();
    let or_placeholder = |value: &Option<String>| -> String {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(placeholder)
            .to_string()
    };

    let badge = match report.verdict() {
        FraudVerdict::Yes => "**FRAUD**",
        FraudVerdict::No => "**OK**",
        FraudVerdict::Unknown => "**UNKNOWN**",
    };
    block.push_str(&format!(
        "### {} {}\n\n",
        badge,
        single_line(&or_placeholder(&fields.merchant_name))
    ));

    block.push_str("| Field | Value |\n");
    block.push_str("|:---|:---|\n");
    block.push_str(&format!("| Fraude | {} |\n", cell(&or_placeholder(&fields.fraud_flag))));
    block.push_str(&format!(
        "| Date de la facture | {} |\n",
        cell(&or_placeholder(&fields.invoice_date))
    ));
    let amount = fields
        .total_amount
        .map(|a| format!("{:.2}", a))
        .unwrap_or_else(|| placeholder.to_string());
    block.push_str(&format!("| Montant total | {} |\n", amount));
    block.push_str(&format!("| Ville | {} |\n", cell(&or_placeholder(&fields.city))));
    block.push_str(&format!(
        "| Adresse complète | {} |\n\n",
        cell(&or_placeholder(&fields.full_address))
    ));

    if !fields.fraud_reasons.is_empty() {
        block.push_str("**Raisons:**\n\n");
        for reason in &fields.fraud_reasons {
            block.push_str(&format!("- {}\n", single_line(reason)));
        }
        block.push('\n');
    }

    block.push_str(&format!(
        "*Report `{}` recorded {}*\n\n",
        report.id,
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    block.push_str("---\n\n");

    block
}

fn generate_footer() -> String {
    "*Report generated by OptiAgent*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(document: &ReportDocument) -> Result<String> {
    serde_json::to_string_pretty(document).map_err(Into::into)
}

/// Table cell text: pipes escaped, line breaks kept as `<br>`.
fn cell(text: &str) -> String {
    text.replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace(['\n', '\r'], "<br>")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Execution, User};
    use serde_json::json;

    fn report(payload: serde_json::Value) -> FraudReport {
        let execution = Execution::start("agent-1", None);
        FraudReport::new(&execution, payload.as_object().cloned().unwrap_or_default())
    }

    fn execution_document(reports: Vec<FraudReport>) -> ReportDocument {
        let mut execution = Execution::start("agent-1", None);
        execution.notes = Some("Résultats d'analyse enregistrés".to_string());
        ReportDocument::new(
            Subject::Execution {
                execution,
                agent: None,
            },
            reports,
        )
    }

    #[test]
    fn test_generate_markdown_report() {
        let document = execution_document(vec![report(
            serde_json::from_str(include_str!("../../fixtures/payloads/wrapped_list.json")).unwrap(),
        )]);
        let markdown = generate_markdown_report(&document, "inconnu");

        assert!(markdown.contains("# OptiAgent Fraud Report"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("### **FRAUD** Hotel Atlas"));
        assert!(markdown.contains("| Montant total | 720.50 |"));
        assert!(markdown.contains("- Ville hors mission"));
        assert!(markdown.contains("**Flagged amount:** 720.50"));
        assert!(markdown.contains("Résultats d'analyse enregistrés"));
    }

    #[test]
    fn test_missing_fields_use_placeholder() {
        let block = generate_invoice_block(&report(json!({"fraude": "Non"})), "inconnu");

        assert!(block.contains("### **OK** inconnu"));
        assert!(block.contains("| Ville | inconnu |"));
        assert!(block.contains("| Montant total | inconnu |"));
        assert!(!block.contains("Raisons"));
    }

    #[test]
    fn test_table_cells_are_escaped() {
        let document = execution_document(vec![report(json!({
            "fraude": "Oui",
            "Nom du commerce": "Café\nCentral",
            "Ville": "Fès | Médina",
            "Adresse complète": "12 Rue Atlas\nBloc B",
            "raison": ["Montant | excessif", "Date\r\nhors période"]
        }))]);
        let markdown = generate_markdown_report(&document, "inconnu");

        assert!(markdown.contains("### **FRAUD** Café Central\n"));
        assert!(markdown.contains("| Fès \\| Médina | 1 |"));
        assert!(markdown.contains("| Ville | Fès \\| Médina |"));
        assert!(markdown.contains("| Adresse complète | 12 Rue Atlas<br>Bloc B |"));
        assert!(markdown.contains("| Montant \\| excessif | 1 |"));
        assert!(markdown.contains("| Date<br>hors période | 1 |"));
        assert!(markdown.contains("- Date hors période\n"));
        assert!(markdown
            .lines()
            .filter(|l| l.starts_with('|'))
            .all(|l| l.ends_with('|')));
    }

    #[test]
    fn test_flagged_invoices_come_first() {
        let document = execution_document(vec![
            report(json!({"fraude": "Non", "Nom du commerce": "Cleared"})),
            report(json!({"Nom du commerce": "Unclear"})),
            report(json!({"fraude": "Oui", "Nom du commerce": "Flagged"})),
        ]);
        let markdown = generate_markdown_report(&document, "inconnu");

        let position = |heading: &str| markdown.find(heading).unwrap();
        assert!(position("### **FRAUD** Flagged") < position("### **UNKNOWN** Unclear"));
        assert!(position("### **UNKNOWN** Unclear") < position("### **OK** Cleared"));
    }

    #[test]
    fn test_empty_document() {
        let markdown = generate_markdown_report(&execution_document(vec![]), "n/a");
        assert!(markdown.contains("No analysis results have been recorded yet."));
        assert!(!markdown.contains("Fraud Reasons"));
    }

    #[test]
    fn test_user_statistics_section() {
        let user = User::new("Amina", "amina@example.com");
        let statistics = UserStatistics {
            total_agents: 1,
            total_executions: 4,
            successful_executions: 3,
            failed_executions: 1,
        };
        let document = ReportDocument::new(
            Subject::User {
                user,
                agents: vec![],
                statistics,
            },
            vec![],
        );

        let markdown = generate_markdown_report(&document, "inconnu");
        assert!(markdown.contains("## Statistics"));
        assert!(markdown.contains("- **Success Rate:** 75.0%"));
    }

    #[test]
    fn test_generate_json_report() {
        let document = execution_document(vec![report(json!({"fraude": "Oui", "Ville": "Fès"}))]);
        let json = generate_json_report(&document).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["subject"]["type"], "execution");
        assert_eq!(value["summary"]["flagged"], 1);
        assert_eq!(value["reports"][0]["city"], "Fès");
        assert_eq!(value["reports"][0]["rawPayload"]["Ville"], "Fès");
    }
}
