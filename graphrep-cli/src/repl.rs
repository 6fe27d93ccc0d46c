//! Interactive REPL.

use crate::commands::{
    build_request, format_nodes, format_node, format_rel, format_reply, format_table,
    parse_labels, parse_properties, parse_value, CliResult,
};
use colored::Colorize;
use graphrep_client::Client;
use graphrep_protocol::value::Properties;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;

const HELP_TEXT: &str = r#"
Available commands:
  help                                Show this help

  get <id>                            Get a node
  create <labels> [props]             Create a node (labels comma-separated)
  put <id> <labels> [props]           Replace labels and properties
  patch <id> <labels> [props]         Add labels, merge properties
  delete <id>                         Delete a node

  rel <id>                            Get a relationship
  link <start> <end> <type> [props]   Create a relationship
  unlink <id>                         Delete a relationship

  nodes <label> [key value]           List nodes by label
  merge <label> <key> <value>         Get or create nodes
  query <text>                        Run a query

  send <METHOD> <resource> [args...]  Send a raw request

  quit, exit                          Exit the REPL

Use '-' for an empty label list. Properties are JSON maps.
"#;

pub async fn run(client: Client, addr: SocketAddr) -> CliResult<()> {
    println!("{}", "graphrep CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    client.connect().await?;
    println!("{}", "Connected!".green());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".graphrep_history"))
        .unwrap_or_else(|_| ".graphrep_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "graphrep>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => {
                        println!("{}: {}\n", "Error".red(), e);
                        if !client.is_connected().await {
                            println!("Reconnecting to {}...", addr);
                            if let Err(e) = client.connect().await {
                                println!("{}: {}", "Connection failed".red(), e);
                                break;
                            }
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Splits a line into at most `n` whitespace-separated fields; the last
/// field keeps the remainder of the line, spaces included.
fn split_fields(line: &str, n: usize) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if fields.len() + 1 == n {
            fields.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                fields.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                fields.push(rest);
                break;
            }
        }
    }
    fields
}

fn labels_arg(arg: &str) -> Vec<&str> {
    if arg == "-" {
        Vec::new()
    } else {
        parse_labels(arg)
    }
}

fn props_arg(args: &[&str], index: usize) -> CliResult<Properties> {
    parse_properties(args.get(index).copied())
}

async fn execute_repl_command(client: &Client, line: &str) -> CliResult<Option<String>> {
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "get" | "g" => {
            let args = split_fields(rest, 1);
            let Some(id) = args.first() else {
                return Ok(Some("Usage: get <id>".to_string()));
            };
            Ok(Some(format_node(&client.get_node(id.parse()?).await?)))
        }

        "create" | "c" => {
            let args = split_fields(rest, 2);
            if args.is_empty() {
                return Ok(Some("Usage: create <labels> [props]".to_string()));
            }
            let node = client
                .create_node(&labels_arg(args[0]), props_arg(&args, 1)?)
                .await?;
            Ok(Some(format!("{} {}", "Created".green(), format_node(&node))))
        }

        "put" | "patch" => {
            let args = split_fields(rest, 3);
            if args.len() < 2 {
                return Ok(Some(format!("Usage: {} <id> <labels> [props]", cmd)));
            }
            let id = args[0].parse()?;
            let labels = labels_arg(args[1]);
            let props = props_arg(&args, 2)?;
            let node = if cmd == "put" {
                client.replace_node(id, &labels, props).await?
            } else {
                client.update_node(id, &labels, props).await?
            };
            Ok(Some(format_node(&node)))
        }

        "delete" | "d" => {
            let args = split_fields(rest, 1);
            let Some(id) = args.first() else {
                return Ok(Some("Usage: delete <id>".to_string()));
            };
            client.delete_node(id.parse()?).await?;
            Ok(Some(format!("{} node {}", "Deleted".green(), id.cyan())))
        }

        "rel" => {
            let args = split_fields(rest, 1);
            let Some(id) = args.first() else {
                return Ok(Some("Usage: rel <id>".to_string()));
            };
            Ok(Some(format_rel(&client.get_relationship(id.parse()?).await?)))
        }

        "link" => {
            let args = split_fields(rest, 4);
            if args.len() < 3 {
                return Ok(Some("Usage: link <start> <end> <type> [props]".to_string()));
            }
            let rel = client
                .create_relationship(args[0].parse()?, args[1].parse()?, args[2], props_arg(&args, 3)?)
                .await?;
            Ok(Some(format!("{} {}", "Created".green(), format_rel(&rel))))
        }

        "unlink" => {
            let args = split_fields(rest, 1);
            let Some(id) = args.first() else {
                return Ok(Some("Usage: unlink <id>".to_string()));
            };
            client.delete_relationship(id.parse()?).await?;
            Ok(Some(format!("{} relationship {}", "Deleted".green(), id.cyan())))
        }

        "nodes" | "n" => {
            let args = split_fields(rest, 3);
            let property = match args.len() {
                1 => None,
                3 => Some((args[1], parse_value(args[2]))),
                _ => return Ok(Some("Usage: nodes <label> [key value]".to_string())),
            };
            Ok(Some(format_nodes(&client.nodeset(args[0], property).await?)))
        }

        "merge" | "m" => {
            let args = split_fields(rest, 3);
            if args.len() < 3 {
                return Ok(Some("Usage: merge <label> <key> <value>".to_string()));
            }
            let (created, nodes) = client
                .merge_nodes(args[0], args[1], parse_value(args[2]))
                .await?;
            let verb = if created {
                "Created".green()
            } else {
                "Matched".yellow()
            };
            Ok(Some(format!("{}\n{}", verb, format_nodes(&nodes))))
        }

        "query" | "cypher" => {
            if rest.is_empty() {
                return Ok(Some("Usage: query <text>".to_string()));
            }
            let table = client.execute(rest, Properties::new()).await?;
            Ok(Some(format_table(&table)))
        }

        "send" => {
            let args: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if args.len() < 2 {
                return Ok(Some("Usage: send <METHOD> <resource> [args...]".to_string()));
            }
            let request = build_request(&args[0], &args[1], &args[2..]);
            let reply = client.connection().request(&request).await?;
            Ok(Some(format_reply(&reply)))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
