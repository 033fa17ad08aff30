//! Interactive command parsing for the replica and paper-client prompts.
//!
//! Commands are case-insensitive; the replica prompt also accepts one-letter
//! aliases.

use anyhow::{Result, anyhow};

use crate::{papers::PaperId, wire::Update};

/// Commands accepted at the replica prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaCommand {
    Put { key: String, value: String },
    Get { key: String },
    Status,
    Peers,
    AddPeer { addr: String },
    RemovePeer { addr: String },
    Help,
    Exit,
}

impl ReplicaCommand {
    /// Parses one line of user input.
    ///
    /// - `PUT <key> <value>` (alias `p`)
    /// - `GET <key>` (alias `g`)
    /// - `STATUS` (alias `s`) prints the whole local store
    /// - `PEERS` lists registered peers
    /// - `ADD-PEER <addr>` / `REMOVE-PEER <addr>`
    /// - `HELP` (alias `h`), `EXIT` (alias `e`)
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized = match cmd.as_str() {
            "P" => "PUT",
            "G" => "GET",
            "S" => "STATUS",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized, parts.len()) {
            ("EXIT", 1) => Ok(Self::Exit),
            ("HELP", 1) => Ok(Self::Help),
            ("STATUS", 1) => Ok(Self::Status),
            ("PEERS", 1) => Ok(Self::Peers),
            ("GET", 2) => Ok(Self::Get {
                key: parts[1].to_string(),
            }),
            ("PUT", 3) => {
                let update = Update::try_new(parts[1], parts[2])?;
                Ok(Self::Put {
                    key: update.key,
                    value: update.value,
                })
            }
            ("ADD-PEER", 2) => Ok(Self::AddPeer {
                addr: parts[1].to_string(),
            }),
            ("REMOVE-PEER", 2) => Ok(Self::RemovePeer {
                addr: parts[1].to_string(),
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("PUT", _) => Err(anyhow!("PUT requires exactly two arguments: PUT <key> <value>")),
            ("ADD-PEER" | "REMOVE-PEER", _) => Err(anyhow!("{normalized} requires one address")),
            ("EXIT" | "HELP" | "STATUS" | "PEERS", _) => {
                Err(anyhow!("{normalized} takes no arguments"))
            }
            _ => Err(anyhow!(
                "invalid command. Try: PUT/p <key> <value>, GET/g <key>, STATUS/s, PEERS, HELP/h, EXIT/e"
            )),
        }
    }

    pub fn help_lines() -> Vec<String> {
        [
            "Commands (case-insensitive):",
            "  PUT <key> <value>    (alias: p)  -- write locally, push to peers",
            "  GET <key>            (alias: g)  -- read local value",
            "  STATUS               (alias: s)  -- show local store",
            "  PEERS                            -- list peers",
            "  ADD-PEER <addr>                  -- start pushing writes to addr",
            "  REMOVE-PEER <addr>               -- stop pushing writes to addr",
            "  HELP                 (alias: h)  -- show this message",
            "  EXIT                 (alias: e)  -- shut down",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

/// Commands accepted at the paper-client prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperCommand {
    Add {
        author: String,
        title: String,
        path: String,
    },
    List,
    Detail { paper_id: PaperId },
    Fetch { paper_id: PaperId },
    Help,
    Exit,
}

impl PaperCommand {
    /// Parses `add <author> <title> <path>`, `list`, `detail <id>`,
    /// `fetch <id>`, `help` or `exit`.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        match (first.to_lowercase().as_str(), parts.len()) {
            ("add", 4) => Ok(Self::Add {
                author: parts[1].to_string(),
                title: parts[2].to_string(),
                path: parts[3].to_string(),
            }),
            ("add", _) => Err(anyhow!("usage: add <author> <title> <filepath>")),
            ("list", _) => Ok(Self::List),
            ("detail", 2) => Ok(Self::Detail {
                paper_id: parse_paper_id(parts[1])?,
            }),
            ("detail", _) => Err(anyhow!("usage: detail <paper-id>")),
            ("fetch", 2) => Ok(Self::Fetch {
                paper_id: parse_paper_id(parts[1])?,
            }),
            ("fetch", _) => Err(anyhow!("usage: fetch <paper-id>")),
            ("help", _) => Ok(Self::Help),
            ("exit", _) => Ok(Self::Exit),
            (other, _) => Err(anyhow!("unknown command: {other}")),
        }
    }

    pub fn help_lines() -> Vec<String> {
        [
            "  [add command]: add <author-name> <title> <filepath>",
            "  [list command]: list",
            "  [fetch command]: fetch <paper-id>",
            "  [detail command]: detail <paper-id>",
            "  [exit]: exit",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

fn parse_paper_id(raw: &str) -> Result<PaperId> {
    raw.parse()
        .map_err(|err| anyhow!("invalid paper id '{raw}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_commands_are_case_insensitive() {
        assert_eq!(ReplicaCommand::parse("exit").unwrap(), ReplicaCommand::Exit);
        assert_eq!(ReplicaCommand::parse("ExIt").unwrap(), ReplicaCommand::Exit);
        assert_eq!(ReplicaCommand::parse("status").unwrap(), ReplicaCommand::Status);
        assert_eq!(ReplicaCommand::parse("peers").unwrap(), ReplicaCommand::Peers);
        assert_eq!(
            ReplicaCommand::parse("PuT k v").unwrap(),
            ReplicaCommand::Put {
                key: "k".into(),
                value: "v".into()
            }
        );
    }

    #[test]
    fn replica_aliases() {
        assert_eq!(ReplicaCommand::parse("e").unwrap(), ReplicaCommand::Exit);
        assert_eq!(ReplicaCommand::parse("H").unwrap(), ReplicaCommand::Help);
        assert_eq!(ReplicaCommand::parse("s").unwrap(), ReplicaCommand::Status);
        assert_eq!(
            ReplicaCommand::parse("g foo").unwrap(),
            ReplicaCommand::Get { key: "foo".into() }
        );
        assert_eq!(
            ReplicaCommand::parse("P KEY VAL").unwrap(),
            ReplicaCommand::Put {
                key: "KEY".into(),
                value: "VAL".into()
            }
        );
    }

    #[test]
    fn replica_peer_management() {
        assert_eq!(
            ReplicaCommand::parse("add-peer 127.0.0.1:7001").unwrap(),
            ReplicaCommand::AddPeer {
                addr: "127.0.0.1:7001".into()
            }
        );
        assert_eq!(
            ReplicaCommand::parse("REMOVE-PEER 127.0.0.1:7001").unwrap(),
            ReplicaCommand::RemovePeer {
                addr: "127.0.0.1:7001".into()
            }
        );
        assert!(ReplicaCommand::parse("add-peer").is_err());
    }

    #[test]
    fn replica_invalid_commands() {
        assert!(ReplicaCommand::parse("").is_err());
        assert!(ReplicaCommand::parse("   ").is_err());
        assert!(ReplicaCommand::parse("INVALID").is_err());
        assert!(ReplicaCommand::parse("GET").is_err());
        assert!(ReplicaCommand::parse("PUT key").is_err());
        assert!(ReplicaCommand::parse("status now").is_err());
    }

    #[test]
    fn put_refuses_values_that_cannot_reach_peers() {
        let err = ReplicaCommand::parse("PUT url http://example.com").unwrap_err();
        assert!(err.to_string().contains("':'"), "got: {err}");
        assert!(ReplicaCommand::parse("p a:b c").is_err());
        assert!(ReplicaCommand::parse("PUT url example.com").is_ok());
    }

    #[test]
    fn paper_commands() {
        assert_eq!(
            PaperCommand::parse("add Lamport Paxos paxos.pdf").unwrap(),
            PaperCommand::Add {
                author: "Lamport".into(),
                title: "Paxos".into(),
                path: "paxos.pdf".into()
            }
        );
        assert_eq!(PaperCommand::parse("LIST").unwrap(), PaperCommand::List);
        assert_eq!(
            PaperCommand::parse("detail 3").unwrap(),
            PaperCommand::Detail { paper_id: 3 }
        );
        assert_eq!(
            PaperCommand::parse("fetch 7").unwrap(),
            PaperCommand::Fetch { paper_id: 7 }
        );
        assert_eq!(PaperCommand::parse("exit").unwrap(), PaperCommand::Exit);
    }

    #[test]
    fn paper_command_errors() {
        assert!(PaperCommand::parse("add only-author").is_err());
        assert!(PaperCommand::parse("detail abc").is_err());
        assert!(PaperCommand::parse("fetch -1").is_err());
        assert!(PaperCommand::parse("frobnicate").is_err());
        assert!(PaperCommand::parse("").is_err());
    }
}
