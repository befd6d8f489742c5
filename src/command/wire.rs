//! Wire and storage shape of a command.
//!
//! ```json
//! {"type": "clocks/addSegments", "payload": {"id": "..", "amount": 2},
//!  "timestamp": 1700000000000, "commandId": "..", "userId": "..", "version": 1}
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::command::{COMMAND_VERSION, Command, CommandBody};
use crate::error::SyncError;
use crate::types::{CommandId, Domain};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: i64,
    pub command_id: CommandId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    COMMAND_VERSION
}

/// Splits a body into its verb and payload as serialized by the domain enum.
fn encode_body(body: &CommandBody) -> Result<(String, Value), serde_json::Error> {
    let tagged = match body {
        CommandBody::Characters(command) => serde_json::to_value(command)?,
        CommandBody::Crews(command) => serde_json::to_value(command)?,
        CommandBody::Clocks(command) => serde_json::to_value(command)?,
    };
    let Value::Object(mut fields) = tagged else {
        return Err(serde::ser::Error::custom("command body is not an object"));
    };
    let verb = match fields.remove("verb") {
        Some(Value::String(verb)) => verb,
        _ => return Err(serde::ser::Error::custom("command body has no verb")),
    };
    let payload = fields.remove("payload").unwrap_or(Value::Null);
    Ok((verb, payload))
}

fn decode_body(domain: Domain, verb: &str, payload: Value) -> Result<CommandBody, serde_json::Error> {
    let mut tagged = Map::new();
    tagged.insert("verb".into(), Value::String(verb.to_string()));
    tagged.insert("payload".into(), payload);
    let tagged = Value::Object(tagged);

    Ok(match domain {
        Domain::Characters => CommandBody::Characters(serde_json::from_value(tagged)?),
        Domain::Crews => CommandBody::Crews(serde_json::from_value(tagged)?),
        Domain::Clocks => CommandBody::Clocks(serde_json::from_value(tagged)?),
    })
}

/// The `<domain>/<verb>` type string of a body.
pub fn type_name(body: &CommandBody) -> String {
    match encode_body(body) {
        Ok((verb, _)) => format!("{}/{}", body.domain(), verb),
        Err(_) => format!("{}/unknown", body.domain()),
    }
}

impl TryFrom<&Command> for WireCommand {
    type Error = serde_json::Error;

    fn try_from(command: &Command) -> Result<Self, Self::Error> {
        let (verb, payload) = encode_body(&command.body)?;
        Ok(WireCommand {
            kind: format!("{}/{}", command.body.domain(), verb),
            payload,
            timestamp: command.timestamp,
            command_id: command.command_id,
            user_id: command.user_id.clone(),
            version: command.version,
        })
    }
}

impl TryFrom<WireCommand> for Command {
    type Error = SyncError;

    fn try_from(wire: WireCommand) -> Result<Self, Self::Error> {
        let Some((domain_name, verb)) = wire.kind.split_once('/') else {
            return Err(SyncError::MalformedCommand(format!(
                "type {:?} is not <domain>/<verb>",
                wire.kind
            )));
        };
        let domain = Domain::from_wire(domain_name).ok_or_else(|| {
            SyncError::MalformedCommand(format!("unknown domain {:?}", domain_name))
        })?;
        let body = decode_body(domain, verb, wire.payload)
            .map_err(|e| SyncError::MalformedCommand(format!("{}: {}", wire.kind, e)))?;

        Ok(Command {
            body,
            timestamp: wire.timestamp,
            command_id: wire.command_id,
            user_id: wire.user_id,
            version: wire.version,
        })
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireCommand::try_from(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireCommand::deserialize(deserializer)?;
        Command::try_from(wire).map_err(serde::de::Error::custom)
    }
}
