//! Command execution and output formatting.

use crate::Commands;
use colored::Colorize;
use graphrep_client::{Client, Reply, Table};
use graphrep_protocol::value::Properties;
use graphrep_protocol::{Method, NodeSnapshot, RelSnapshot, Request, Status, Value};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> CliResult<String> {
    match cmd {
        Commands::Repl => unreachable!(),

        Commands::GetNode { id } => Ok(format_node(&client.get_node(id).await?)),

        Commands::CreateNode { labels, props } => {
            let node = client
                .create_node(&as_strs(&labels), parse_properties(props.as_deref())?)
                .await?;
            Ok(format!("{} {}", "Created".green(), format_node(&node)))
        }

        Commands::PutNode { id, labels, props } => {
            let node = client
                .replace_node(id, &as_strs(&labels), parse_properties(props.as_deref())?)
                .await?;
            Ok(format!("{} {}", "Replaced".green(), format_node(&node)))
        }

        Commands::PatchNode { id, labels, props } => {
            let node = client
                .update_node(id, &as_strs(&labels), parse_properties(props.as_deref())?)
                .await?;
            Ok(format!("{} {}", "Updated".green(), format_node(&node)))
        }

        Commands::DeleteNode { id } => {
            client.delete_node(id).await?;
            Ok(format!("{} node {}", "Deleted".green(), id.to_string().cyan()))
        }

        Commands::GetRel { id } => Ok(format_rel(&client.get_relationship(id).await?)),

        Commands::CreateRel {
            start,
            end,
            rel_type,
            props,
        } => {
            let rel = client
                .create_relationship(start, end, &rel_type, parse_properties(props.as_deref())?)
                .await?;
            Ok(format!("{} {}", "Created".green(), format_rel(&rel)))
        }

        Commands::DeleteRel { id } => {
            client.delete_relationship(id).await?;
            Ok(format!(
                "{} relationship {}",
                "Deleted".green(),
                id.to_string().cyan()
            ))
        }

        Commands::Query { query, params } => {
            let table = client
                .execute(&query, parse_properties(params.as_deref())?)
                .await?;
            Ok(format_table(&table))
        }

        Commands::Nodes { label, key, value } => {
            let property = match (key, value) {
                (Some(key), Some(value)) => Some((key, parse_value(&value))),
                (None, None) => None,
                _ => return Err("--key and --value must be used together".into()),
            };
            let nodes = client
                .nodeset(
                    &label,
                    property.as_ref().map(|(k, v)| (k.as_str(), v.clone())),
                )
                .await?;
            Ok(format_nodes(&nodes))
        }

        Commands::Merge { label, key, value } => {
            let (created, nodes) = client.merge_nodes(&label, &key, parse_value(&value)).await?;
            let verb = if created {
                "Created".green()
            } else {
                "Matched".yellow()
            };
            Ok(format!("{}\n{}", verb, format_nodes(&nodes)))
        }

        Commands::Send {
            method,
            resource,
            args,
        } => {
            let request = build_request(&method, &resource, &args);
            let reply = client.connection().request(&request).await?;
            Ok(format_reply(&reply))
        }
    }
}

fn as_strs(labels: &[String]) -> Vec<&str> {
    labels.iter().map(String::as_str).collect()
}

/// Splits a comma-separated label list.
pub fn parse_labels(arg: &str) -> Vec<&str> {
    arg.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .collect()
}

/// Parses a value literal. Text that is not a valid literal is taken as a
/// plain string, so `name Alice` works without quoting.
pub fn parse_value(arg: &str) -> Value {
    Value::decode(arg).unwrap_or_else(|_| Value::from(arg))
}

/// Parses a property map literal (or `@file.json`). No argument means an
/// empty map.
pub fn parse_properties(arg: Option<&str>) -> CliResult<Properties> {
    let arg = match arg {
        Some(arg) if !arg.trim().is_empty() => arg,
        _ => return Ok(Properties::new()),
    };
    let literal = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => arg.to_string(),
    };
    match Value::decode(literal.trim())? {
        Value::Map(map) => Ok(map),
        other => Err(format!("expected a property map, found {}", other.type_name()).into()),
    }
}

/// Builds a raw request from a verb, a resource and argument literals.
pub fn build_request(method: &str, resource: &str, args: &[String]) -> Request {
    args.iter().fold(
        Request::new(Method::parse(&method.to_uppercase()), resource),
        |request, arg| request.with_arg(parse_value(arg)),
    )
}

pub fn format_node(node: &NodeSnapshot) -> String {
    let labels: Vec<&str> = node.labels.iter().map(String::as_str).collect();
    format!(
        "{} {}{}",
        format!("({})", node.id).cyan(),
        if labels.is_empty() {
            String::new()
        } else {
            format!(":{} ", labels.join(":")).yellow().to_string()
        },
        format_json(&Value::Map(node.properties.clone()))
    )
}

pub fn format_rel(rel: &RelSnapshot) -> String {
    format!(
        "{} ({})-[:{}]->({}) {}",
        format!("[{}]", rel.id).cyan(),
        rel.start,
        rel.rel_type.yellow(),
        rel.end,
        format_json(&Value::Map(rel.properties.clone()))
    )
}

pub fn format_nodes(nodes: &[NodeSnapshot]) -> String {
    if nodes.is_empty() {
        return "No nodes".yellow().to_string();
    }
    nodes
        .iter()
        .map(|node| format!("  {}", format_node(node)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a query result as a tab-separated table with a header.
pub fn format_table(table: &Table) -> String {
    let mut output = table.columns.join("\t").bold().to_string();
    for row in &table.rows {
        output.push('\n');
        output.push_str(
            &row.iter()
                .map(format_value)
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    output.push_str(
        &format!(
            "\n({} row{})",
            table.len(),
            if table.len() == 1 { "" } else { "s" }
        )
        .dimmed()
        .to_string(),
    );
    output
}

/// Renders every frame of an exchange the way it came off the wire.
pub fn format_reply(reply: &Reply) -> String {
    let mut output = String::new();
    for frame in &reply.continues {
        output.push_str(&format!(
            "{} {}\n",
            frame.status.code().to_string().dimmed(),
            frame.data.iter().map(format_value).collect::<Vec<_>>().join("\t")
        ));
    }
    let code = reply.status.code().to_string();
    let code = match reply.status {
        s if s.is_success() => code.green(),
        Status::ServerError => code.red(),
        _ => code.yellow(),
    };
    output.push_str(&format!(
        "{} {}",
        code,
        reply.body.iter().map(format_value).collect::<Vec<_>>().join("\t")
    ));
    output
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Node(node) => format_node(node),
        Value::Rel(rel) => format_rel(rel),
        other => format_json(other),
    }
}

/// Formats a value as compact JSON.
fn format_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrep_protocol::Response;
    use std::io::Write;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(parse_labels("Person, Admin,,"), vec!["Person", "Admin"]);
        assert!(parse_labels("").is_empty());
    }

    #[test]
    fn test_parse_value_falls_back_to_string() {
        assert_eq!(parse_value("42"), Value::Int(42));
        assert_eq!(parse_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_value("\"quoted\""), Value::from("quoted"));
        assert_eq!(parse_value("Alice"), Value::from("Alice"));
    }

    #[test]
    fn test_parse_properties() {
        assert!(parse_properties(None).unwrap().is_empty());
        let props = parse_properties(Some(r#"{"name": "Alice", "age": 30}"#)).unwrap();
        assert_eq!(props.get("age"), Some(&Value::Int(30)));
        assert!(parse_properties(Some("[1, 2]")).is_err());
        assert!(parse_properties(Some("{broken")).is_err());
    }

    #[test]
    fn test_parse_properties_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"city": "Oslo"}}"#).unwrap();
        let arg = format!("@{}", file.path().display());
        let props = parse_properties(Some(&arg)).unwrap();
        assert_eq!(props.get("city"), Some(&Value::from("Oslo")));
    }

    #[test]
    fn test_build_request() {
        let request = build_request("get", "node", &["7".to_string()]);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.resource, "node");
        assert_eq!(request.data, vec![Value::Int(7)]);

        let request = build_request("brew", "node", &[]);
        assert_eq!(request.method, Method::Other("BREW".to_string()));
    }

    #[test]
    fn test_format_node() {
        plain();
        let node = NodeSnapshot::new(3)
            .with_label("Person")
            .with_property("name", "Alice");
        assert_eq!(format_node(&node), r#"(3) :Person {"name":"Alice"}"#);
        assert_eq!(format_node(&NodeSnapshot::new(4)), "(4) {}");
    }

    #[test]
    fn test_format_table() {
        plain();
        let table = Table {
            columns: vec!["name".into(), "age".into()],
            rows: vec![vec![Value::from("Alice"), Value::from(30)]],
        };
        assert_eq!(format_table(&table), "name\tage\nAlice\t30\n(1 row)");
    }

    #[test]
    fn test_format_reply() {
        plain();
        let reply = Reply {
            continues: vec![Response::new(Status::Continue, vec![Value::from("n")])],
            status: Status::NotFound,
            body: vec![Value::from("Node 9 not found")],
        };
        assert_eq!(format_reply(&reply), "100 n\n404 Node 9 not found");
    }
}
