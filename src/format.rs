//! Text / JSON / XML renderers for `CommandReturn`/`WorkflowReturn` results.
//!
//! Each result renders the tuple `(name, address, command, date, stdout-lines,
//! stderr-lines, error)`. No XML crate in this dependency stack fits a
//! surface this small, so XML output is hand-rolled, escaping the five
//! predefined entities — documented as a deliberate choice in DESIGN.md
//! rather than an oversight.

use crate::executor::CommandReturn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Xml,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }
}

/// A single rendered result row. `CommandReturn::needs_restarting_services`,
/// when set, replaces the literal stdout for display, matching the
/// `needs-restarting` display special case.
pub struct ResultRow<'a> {
    pub command_return: &'a CommandReturn,
}

impl<'a> ResultRow<'a> {
    pub fn new(command_return: &'a CommandReturn) -> Self {
        Self { command_return }
    }

    fn stdout_lines(&self) -> Vec<String> {
        match &self.command_return.needs_restarting_services {
            Some(services) => services.clone(),
            None => self.command_return.stdout_lines(),
        }
    }
}

/// Render every non-quiet row in `rows` in the requested format.
pub fn render(rows: &[ResultRow<'_>], format: OutputFormat) -> String {
    let visible: Vec<&ResultRow> = rows.iter().filter(|r| !r.command_return.quiet).collect();
    match format {
        OutputFormat::Text => render_text(&visible),
        OutputFormat::Json => render_json(&visible),
        OutputFormat::Xml => render_xml(&visible),
    }
}

fn render_text(rows: &[&ResultRow]) -> String {
    let mut out = String::new();
    for row in rows {
        let cr = row.command_return;
        out.push_str(&format!(
            "== {} ({}) :: {} [{}]\n",
            cr.hostname,
            cr.host.name,
            cr.command,
            cr.date.to_rfc3339()
        ));
        for line in row.stdout_lines() {
            out.push_str(&format!("  {line}\n"));
        }
        for line in cr.stderr_string().lines() {
            out.push_str(&format!("  [stderr] {line}\n"));
        }
        if let Some(err) = &cr.error {
            out.push_str(&format!("  [error] {err}\n"));
        }
    }
    out
}

fn render_json(rows: &[&ResultRow]) -> String {
    #[derive(serde::Serialize)]
    struct Row<'a> {
        name: &'a str,
        address: &'a str,
        command: &'a str,
        date: chrono::DateTime<chrono::Utc>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        error: Option<&'a str>,
    }

    let serializable: Vec<Row> = rows
        .iter()
        .map(|row| {
            let cr = row.command_return;
            Row {
                name: &cr.host.name,
                address: &cr.hostname,
                command: &cr.command,
                date: cr.date,
                stdout: row.stdout_lines(),
                stderr: cr.stderr_string().lines().map(str::to_string).collect(),
                error: cr.error.as_deref(),
            }
        })
        .collect();

    serde_json::to_string_pretty(&serializable).unwrap_or_default()
}

fn render_xml(rows: &[&ResultRow]) -> String {
    let mut out = String::from("<results>\n");
    for row in rows {
        let cr = row.command_return;
        out.push_str("  <result>\n");
        out.push_str(&format!("    <name>{}</name>\n", xml_escape(&cr.host.name)));
        out.push_str(&format!("    <address>{}</address>\n", xml_escape(&cr.hostname)));
        out.push_str(&format!("    <command>{}</command>\n", xml_escape(&cr.command)));
        out.push_str(&format!("    <date>{}</date>\n", xml_escape(&cr.date.to_rfc3339())));
        out.push_str("    <stdout>\n");
        for line in row.stdout_lines() {
            out.push_str(&format!("      <line>{}</line>\n", xml_escape(&line)));
        }
        out.push_str("    </stdout>\n");
        out.push_str("    <stderr>\n");
        for line in cr.stderr_string().lines() {
            out.push_str(&format!("      <line>{}</line>\n", xml_escape(line)));
        }
        out.push_str("    </stderr>\n");
        if let Some(err) = &cr.error {
            out.push_str(&format!("    <error>{}</error>\n", xml_escape(err)));
        }
        out.push_str("  </result>\n");
    }
    out.push_str("</results>\n");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;

    fn sample(quiet: bool) -> CommandReturn {
        CommandReturn {
            host: Host {
                name: "web1".into(),
                ..Default::default()
            },
            hostname: "web1.example.com".into(),
            command: "uptime".into(),
            date: chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap(),
            stdout: b"load average: 0.1\n".to_vec(),
            stderr: Vec::new(),
            error: None,
            quiet,
            needs_restarting_services: None,
        }
    }

    #[test]
    fn quiet_rows_are_omitted() {
        let cr = sample(true);
        let rows = vec![ResultRow::new(&cr)];
        assert_eq!(render(&rows, OutputFormat::Text), "");
    }

    #[test]
    fn text_render_includes_host_and_command() {
        let cr = sample(false);
        let rows = vec![ResultRow::new(&cr)];
        let rendered = render(&rows, OutputFormat::Text);
        assert!(rendered.contains("web1"));
        assert!(rendered.contains("uptime"));
        assert!(rendered.contains("load average"));
    }

    #[test]
    fn needs_restarting_services_replace_stdout_for_display() {
        let mut cr = sample(false);
        cr.needs_restarting_services = Some(vec!["httpd".to_string(), "tomcat".to_string()]);
        let rendered = render(&[ResultRow::new(&cr)], OutputFormat::Text);
        assert!(rendered.contains("httpd"));
        assert!(!rendered.contains("load average"));
    }

    #[test]
    fn xml_escapes_reserved_characters() {
        assert_eq!(xml_escape("<a & b>"), "&lt;a &amp; b&gt;");
    }

    #[test]
    fn json_render_is_valid_and_matches_fields() {
        let cr = sample(false);
        let rows = vec![ResultRow::new(&cr)];
        let rendered = render(&rows, OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed[0]["name"], "web1");
        assert_eq!(parsed[0]["command"], "uptime");
    }

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("bogus"), None);
    }
}
