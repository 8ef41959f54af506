//! Connection state machine for the spreadsheet protocol.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods take the triggering input (a command or a network completion)
//! - Methods return the [`ClientAction`]s the driver must carry out
//! - The machine itself never touches a socket
//!
//! This keeps every transition testable with nothing but a [`LineBuffer`].
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect  ┌────────────┐ socket up ┌────────────────┐
//! │ Disconnected │─────────>│ Connecting │──────────>│ AwaitingRoster │
//! └──────────────┘          └────────────┘           └────────────────┘
//!        ^                        │ failed                   │ "...\n\n"
//!        │                        v                          v
//!        │ error / serverError    ·           ┌───────────────────────────┐
//!        │ / disconnect()                     │ AwaitingSpreadsheetChoice │
//!        │                                    └───────────────────────────┘
//!        │                                                   │ choose_spreadsheet
//!   ┌────────┐         "<id>\n"            ┌────────────────────┐
//!   │ Active │<────────────────────────────│ AwaitingAssignedId │
//!   └────────┘                             └────────────────────┘
//! ```
//!
//! The phase only moves forward, or resets all the way to `Disconnected`.
//! Every completion names the connection (or connect attempt) it belongs
//! to; completions for anything but the current one are ignored.

use std::fmt;

use crate::codec::{Command, JsonCodec};
use crate::error::{CellwireError, Result};
use crate::protocol::{
    ensure_single_line, handshake_line, parse_client_id, roster_complete, take_roster, ClientId,
    LineBuffer, RECORD_TERMINATOR,
};
use crate::transport::ConnectionId;

use super::event::{ClientEvent, USER_DISCONNECTED};

/// Identifies one connect attempt.
pub type AttemptId = u64;

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// No server connection.
    Disconnected,
    /// Resolving and connecting.
    Connecting,
    /// Username sent, reading the spreadsheet list.
    AwaitingRoster,
    /// Roster received, waiting for the user to pick a spreadsheet.
    AwaitingSpreadsheetChoice,
    /// Spreadsheet name sent, reading existing state until the id line.
    AwaitingAssignedId,
    /// Joined; exchanging JSON records.
    Active,
}

impl ConnectionPhase {
    /// Position in the handshake; `Disconnected` is 0.
    pub fn ordinal(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Disconnected => "disconnected",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::AwaitingRoster => "awaiting the spreadsheet list",
            ConnectionPhase::AwaitingSpreadsheetChoice => "awaiting a spreadsheet choice",
            ConnectionPhase::AwaitingAssignedId => "awaiting a client id",
            ConnectionPhase::Active => "active",
        };
        f.write_str(name)
    }
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Start a connect attempt.
    Connect {
        attempt: AttemptId,
        host: String,
        port: u16,
    },
    /// Write `data` to the connection.
    Send {
        connection: ConnectionId,
        data: String,
    },
    /// Issue the next receive on the connection.
    Receive { connection: ConnectionId },
    /// Close the connection.
    Close { connection: ConnectionId },
    /// Hand an event to collaborators.
    Publish(ClientEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    connection: ConnectionId,
    username: String,
}

#[derive(Debug, Clone, Default)]
enum State {
    #[default]
    Disconnected,
    Connecting {
        attempt: AttemptId,
        username: String,
    },
    AwaitingRoster {
        session: Session,
    },
    AwaitingSpreadsheetChoice {
        session: Session,
        spreadsheets: Vec<String>,
    },
    AwaitingAssignedId {
        session: Session,
        spreadsheet: String,
    },
    Active {
        session: Session,
        spreadsheet: String,
        client_id: ClientId,
    },
}

impl State {
    fn phase(&self) -> ConnectionPhase {
        match self {
            State::Disconnected => ConnectionPhase::Disconnected,
            State::Connecting { .. } => ConnectionPhase::Connecting,
            State::AwaitingRoster { .. } => ConnectionPhase::AwaitingRoster,
            State::AwaitingSpreadsheetChoice { .. } => ConnectionPhase::AwaitingSpreadsheetChoice,
            State::AwaitingAssignedId { .. } => ConnectionPhase::AwaitingAssignedId,
            State::Active { .. } => ConnectionPhase::Active,
        }
    }

    fn session(&self) -> Option<&Session> {
        match self {
            State::AwaitingRoster { session }
            | State::AwaitingSpreadsheetChoice { session, .. }
            | State::AwaitingAssignedId { session, .. }
            | State::Active { session, .. } => Some(session),
            State::Disconnected | State::Connecting { .. } => None,
        }
    }
}

/// Client-side protocol state machine.
///
/// Pure: no I/O, no clock. The caller serialises access (the client keeps
/// it behind one mutex together with the live socket).
#[derive(Debug, Clone, Default)]
pub struct Machine {
    state: State,
    last_attempt: AttemptId,
}

impl Machine {
    /// Create a machine in [`ConnectionPhase::Disconnected`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    /// Connection owned by the current session, if any.
    #[must_use]
    pub fn connection(&self) -> Option<ConnectionId> {
        self.state.session().map(|session| session.connection)
    }

    /// Username of the current session.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match &self.state {
            State::Connecting { username, .. } => Some(username.as_str()),
            other => other.session().map(|session| session.username.as_str()),
        }
    }

    /// Spreadsheets offered by the server while a choice is pending.
    #[must_use]
    pub fn spreadsheets(&self) -> Option<&[String]> {
        match &self.state {
            State::AwaitingSpreadsheetChoice { spreadsheets, .. } => Some(spreadsheets.as_slice()),
            _ => None,
        }
    }

    /// Spreadsheet chosen for the current session.
    #[must_use]
    pub fn spreadsheet(&self) -> Option<&str> {
        match &self.state {
            State::AwaitingAssignedId { spreadsheet, .. } | State::Active { spreadsheet, .. } => {
                Some(spreadsheet.as_str())
            }
            _ => None,
        }
    }

    /// Id assigned by the server, once `Active`.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        match &self.state {
            State::Active { client_id, .. } => Some(*client_id),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Commands (rejected synchronously when invalid)
    // ------------------------------------------------------------------

    /// Start connecting as `username`.
    ///
    /// # Errors
    ///
    /// `InvalidPhase` unless `Disconnected`; `EmbeddedNewline` if the
    /// username spans lines.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        username: &str,
    ) -> Result<Vec<ClientAction>> {
        self.require(ConnectionPhase::Disconnected, "connect")?;
        ensure_single_line("username", username)?;

        self.last_attempt += 1;
        let attempt = self.last_attempt;
        self.commit(
            State::Connecting {
                attempt,
                username: username.to_owned(),
            },
            "connect",
        );

        Ok(vec![ClientAction::Connect {
            attempt,
            host: host.to_owned(),
            port,
        }])
    }

    /// Open `name` from the roster.
    ///
    /// # Errors
    ///
    /// `InvalidPhase` unless `AwaitingSpreadsheetChoice`; `EmbeddedNewline`
    /// if the name spans lines.
    pub fn choose_spreadsheet(&mut self, name: &str) -> Result<Vec<ClientAction>> {
        self.require(ConnectionPhase::AwaitingSpreadsheetChoice, "choose a spreadsheet")?;
        let data = handshake_line("spreadsheet name", name)?;

        let session = match std::mem::take(&mut self.state) {
            State::AwaitingSpreadsheetChoice { session, .. } => session,
            // `require` checked the phase above.
            other => {
                self.state = other;
                return Err(self.invalid("choose a spreadsheet"));
            }
        };

        let connection = session.connection;
        self.commit(
            State::AwaitingAssignedId {
                session,
                spreadsheet: name.to_owned(),
            },
            "choose_spreadsheet",
        );

        Ok(vec![
            ClientAction::Send { connection, data },
            ClientAction::Receive { connection },
        ])
    }

    /// Encode and send a request. Only valid while `Active`.
    ///
    /// # Errors
    ///
    /// `InvalidPhase` unless `Active`; `EmbeddedNewline` if a field spans lines.
    pub fn send_command(&self, command: &Command) -> Result<Vec<ClientAction>> {
        let connection = match &self.state {
            State::Active { session, .. } => session.connection,
            _ => return Err(self.invalid("send a request")),
        };

        let data = JsonCodec::encode_command(command)?;
        Ok(vec![ClientAction::Send { connection, data }])
    }

    /// End the session at the user's request.
    ///
    /// # Errors
    ///
    /// `InvalidPhase` if already `Disconnected`.
    pub fn disconnect(&mut self) -> Result<Vec<ClientAction>> {
        if self.phase() == ConnectionPhase::Disconnected {
            return Err(self.invalid("disconnect"));
        }

        Ok(self.reset(USER_DISCONNECTED.to_string(), "disconnect"))
    }

    // ------------------------------------------------------------------
    // Network completions (stale ones are ignored)
    // ------------------------------------------------------------------

    /// Connect attempt `attempt` produced a socket.
    pub fn on_connected(
        &mut self,
        attempt: AttemptId,
        connection: ConnectionId,
    ) -> Vec<ClientAction> {
        let username = match &self.state {
            State::Connecting {
                attempt: current,
                username,
            } if *current == attempt => username.clone(),
            _ => {
                tracing::debug!(attempt, %connection, "Closing socket from stale connect attempt");
                return vec![ClientAction::Close { connection }];
            }
        };

        let mut data = username.clone();
        data.push(RECORD_TERMINATOR);

        self.commit(
            State::AwaitingRoster {
                session: Session {
                    connection,
                    username,
                },
            },
            "on_connected",
        );

        vec![
            ClientAction::Send { connection, data },
            ClientAction::Receive { connection },
        ]
    }

    /// Connect attempt `attempt` failed.
    pub fn on_connect_failed(&mut self, attempt: AttemptId, reason: &str) -> Vec<ClientAction> {
        match &self.state {
            State::Connecting {
                attempt: current, ..
            } if *current == attempt => {
                self.commit(State::Disconnected, "on_connect_failed");
                vec![ClientAction::Publish(ClientEvent::ConnectionFailed {
                    reason: reason.to_owned(),
                })]
            }
            _ => {
                tracing::debug!(attempt, "Ignoring stale connect failure");
                Vec::new()
            }
        }
    }

    /// Data was appended to `connection`'s buffer.
    pub fn on_received(
        &mut self,
        connection: ConnectionId,
        buffer: &mut LineBuffer,
    ) -> Vec<ClientAction> {
        if self.connection() != Some(connection) {
            tracing::debug!(%connection, phase = %self.phase(), "Ignoring stale receive");
            return Vec::new();
        }

        match std::mem::take(&mut self.state) {
            State::AwaitingRoster { session } => self.roster_received(session, buffer),
            state @ (State::AwaitingAssignedId { .. } | State::Active { .. }) => {
                self.records_received(state, buffer)
            }
            other => {
                // No receive is issued while waiting for the user's choice.
                tracing::debug!(%connection, phase = %other.phase(), "Unexpected receive");
                self.state = other;
                Vec::new()
            }
        }
    }

    /// `connection` failed.
    pub fn on_transport_error(
        &mut self,
        connection: ConnectionId,
        reason: &str,
    ) -> Vec<ClientAction> {
        if self.connection() != Some(connection) {
            tracing::debug!(%connection, "Ignoring error from stale connection");
            return Vec::new();
        }

        self.reset(reason.to_owned(), "on_transport_error")
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn roster_received(&mut self, session: Session, buffer: &mut LineBuffer) -> Vec<ClientAction> {
        let connection = session.connection;

        if !roster_complete(buffer) {
            self.state = State::AwaitingRoster { session };
            return vec![ClientAction::Receive { connection }];
        }

        let spreadsheets = take_roster(buffer);
        self.commit(
            State::AwaitingSpreadsheetChoice {
                session,
                spreadsheets: spreadsheets.clone(),
            },
            "roster",
        );

        vec![ClientAction::Publish(ClientEvent::Connected { spreadsheets })]
    }

    fn records_received(&mut self, mut state: State, buffer: &mut LineBuffer) -> Vec<ClientAction> {
        let before = state.phase();
        let mut actions = Vec::new();

        for record in buffer.extract_frames() {
            state = match state {
                State::AwaitingAssignedId {
                    session,
                    spreadsheet,
                } => match parse_client_id(&record) {
                    Some(client_id) => {
                        actions.push(ClientAction::Publish(ClientEvent::IdAssigned {
                            id: client_id,
                        }));
                        State::Active {
                            session,
                            spreadsheet,
                            client_id,
                        }
                    }
                    None => apply_record(
                        State::AwaitingAssignedId {
                            session,
                            spreadsheet,
                        },
                        &record,
                        &mut actions,
                    ),
                },
                other => apply_record(other, &record, &mut actions),
            };

            // serverError ended the session; the rest of the read is dropped.
            if state.session().is_none() {
                break;
            }
        }

        if let Some(session) = state.session() {
            actions.push(ClientAction::Receive {
                connection: session.connection,
            });
        }

        self.state = state;
        self.log_transition(before, "records");
        actions
    }

    /// Move to `Disconnected`, closing any socket and publishing `reason`.
    fn reset(&mut self, reason: String, trigger: &'static str) -> Vec<ClientAction> {
        let connection = self.connection();
        self.commit(State::Disconnected, trigger);

        let mut actions = Vec::with_capacity(2);
        if let Some(connection) = connection {
            actions.push(ClientAction::Close { connection });
        }
        actions.push(ClientAction::Publish(ClientEvent::Disconnected { reason }));
        actions
    }

    fn commit(&mut self, state: State, trigger: &'static str) {
        let before = self.state.phase();
        self.state = state;
        self.log_transition(before, trigger);
    }

    fn log_transition(&self, before: ConnectionPhase, trigger: &'static str) {
        let after = self.state.phase();
        if before != after {
            tracing::debug!(from = ?before, to = ?after, trigger, "Phase transition");
        }
    }

    fn require(&self, phase: ConnectionPhase, operation: &'static str) -> Result<()> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> CellwireError {
        tracing::warn!(phase = %self.phase(), operation, "Rejected operation");
        CellwireError::InvalidPhase {
            phase: self.phase(),
            operation,
        }
    }
}

/// Decode one JSON record and fold it into `state`.
fn apply_record(state: State, record: &str, actions: &mut Vec<ClientAction>) -> State {
    let Some(message) = JsonCodec::decode_message(record) else {
        return state;
    };

    let fatal = message.is_fatal();
    let event = ClientEvent::from(message);

    if fatal {
        tracing::debug!(?event, "Server ended the session");
        if let Some(session) = state.session() {
            actions.push(ClientAction::Close {
                connection: session.connection,
            });
        }
        actions.push(ClientAction::Publish(event));
        return State::Disconnected;
    }

    actions.push(ClientAction::Publish(event));
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: u64 = 7;

    fn conn() -> ConnectionId {
        ConnectionId::from(CONN)
    }

    fn buffer(text: &str) -> LineBuffer {
        let mut buffer = LineBuffer::new();
        buffer.append(text.as_bytes());
        buffer
    }

    fn published(actions: &[ClientAction]) -> Vec<ClientEvent> {
        actions
            .iter()
            .filter_map(|action| match action {
                ClientAction::Publish(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn connecting() -> (Machine, AttemptId) {
        let mut machine = Machine::new();
        let actions = machine.connect("localhost", 1100, "alice").unwrap();
        let attempt = match &actions[..] {
            [ClientAction::Connect { attempt, .. }] => *attempt,
            other => panic!("unexpected actions: {other:?}"),
        };
        (machine, attempt)
    }

    fn awaiting_roster() -> Machine {
        let (mut machine, attempt) = connecting();
        machine.on_connected(attempt, conn());
        machine
    }

    fn awaiting_choice() -> Machine {
        let mut machine = awaiting_roster();
        machine.on_received(conn(), &mut buffer("Sheet1\nSheet2\n\n"));
        machine
    }

    fn awaiting_id() -> Machine {
        let mut machine = awaiting_choice();
        machine.choose_spreadsheet("Sheet1").unwrap();
        machine
    }

    fn active() -> Machine {
        let mut machine = awaiting_id();
        machine.on_received(conn(), &mut buffer("42\n"));
        machine
    }

    #[test]
    fn test_connect_issues_attempt() {
        let mut machine = Machine::new();
        let actions = machine.connect("example.org", 2112, "alice").unwrap();

        assert_eq!(machine.phase(), ConnectionPhase::Connecting);
        assert_eq!(machine.username(), Some("alice"));
        assert_eq!(
            actions,
            vec![ClientAction::Connect {
                attempt: 1,
                host: "example.org".into(),
                port: 2112
            }]
        );
    }

    #[test]
    fn test_connect_rejected_unless_disconnected() {
        let mut machine = awaiting_roster();
        let err = machine.connect("localhost", 1100, "bob").unwrap_err();
        assert!(matches!(
            err,
            CellwireError::InvalidPhase {
                phase: ConnectionPhase::AwaitingRoster,
                ..
            }
        ));
        assert_eq!(machine.phase(), ConnectionPhase::AwaitingRoster);
    }

    #[test]
    fn test_connect_rejects_multiline_username() {
        let mut machine = Machine::new();
        let err = machine.connect("localhost", 1100, "al\nice").unwrap_err();
        assert!(matches!(err, CellwireError::EmbeddedNewline { .. }));
        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_connect_failure_publishes_once() {
        let (mut machine, attempt) = connecting();
        let actions = machine.on_connect_failed(attempt, "Connection refused");

        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
        assert_eq!(
            published(&actions),
            vec![ClientEvent::ConnectionFailed {
                reason: "Connection refused".into()
            }]
        );

        assert!(machine.on_connect_failed(attempt, "again").is_empty());
    }

    #[test]
    fn test_connected_sends_username_and_receives() {
        let (mut machine, attempt) = connecting();
        let actions = machine.on_connected(attempt, conn());

        assert_eq!(machine.phase(), ConnectionPhase::AwaitingRoster);
        assert_eq!(machine.connection(), Some(conn()));
        assert_eq!(
            actions,
            vec![
                ClientAction::Send {
                    connection: conn(),
                    data: "alice\n".into()
                },
                ClientAction::Receive { connection: conn() },
            ]
        );
    }

    #[test]
    fn test_stale_connect_success_is_closed() {
        let (mut machine, attempt) = connecting();
        machine.disconnect().unwrap();

        let actions = machine.on_connected(attempt, conn());
        assert_eq!(actions, vec![ClientAction::Close { connection: conn() }]);
        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_roster_in_one_read() {
        let mut machine = awaiting_roster();
        let actions = machine.on_received(conn(), &mut buffer("Sheet1\nSheet2\n\n"));

        assert_eq!(machine.phase(), ConnectionPhase::AwaitingSpreadsheetChoice);
        assert_eq!(
            actions,
            vec![ClientAction::Publish(ClientEvent::Connected {
                spreadsheets: vec!["Sheet1".into(), "Sheet2".into()]
            })]
        );
        assert_eq!(
            machine.spreadsheets(),
            Some(&["Sheet1".to_string(), "Sheet2".to_string()][..])
        );
    }

    #[test]
    fn test_roster_split_across_reads() {
        let mut machine = awaiting_roster();
        let mut data = buffer("Sheet1\nShe");

        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(actions, vec![ClientAction::Receive { connection: conn() }]);
        assert_eq!(machine.phase(), ConnectionPhase::AwaitingRoster);

        data.append(b"et2\n");
        machine.on_received(conn(), &mut data);
        assert_eq!(machine.phase(), ConnectionPhase::AwaitingRoster);

        data.append(b"\n");
        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(
            published(&actions),
            vec![ClientEvent::Connected {
                spreadsheets: vec!["Sheet1".into(), "Sheet2".into()]
            }]
        );
        assert!(data.is_empty());
    }

    #[test]
    fn test_empty_roster() {
        let mut machine = awaiting_roster();
        let actions = machine.on_received(conn(), &mut buffer("\n"));
        assert_eq!(
            published(&actions),
            vec![ClientEvent::Connected {
                spreadsheets: vec![]
            }]
        );
    }

    #[test]
    fn test_choose_spreadsheet_sends_name() {
        let mut machine = awaiting_choice();
        let actions = machine.choose_spreadsheet("Sheet1").unwrap();

        assert_eq!(machine.phase(), ConnectionPhase::AwaitingAssignedId);
        assert_eq!(machine.spreadsheet(), Some("Sheet1"));
        assert_eq!(
            actions,
            vec![
                ClientAction::Send {
                    connection: conn(),
                    data: "Sheet1\n".into()
                },
                ClientAction::Receive { connection: conn() },
            ]
        );
    }

    #[test]
    fn test_choose_spreadsheet_accepts_unlisted_name() {
        let mut machine = awaiting_choice();
        machine.choose_spreadsheet("Brand New").unwrap();
        assert_eq!(machine.spreadsheet(), Some("Brand New"));
    }

    #[test]
    fn test_choose_spreadsheet_rejected_in_other_phases() {
        let (connecting, _) = connecting();
        let machines = [
            Machine::new(),
            connecting,
            awaiting_roster(),
            awaiting_id(),
            active(),
        ];

        for mut machine in machines {
            let before = machine.phase();
            let err = machine.choose_spreadsheet("Sheet1").unwrap_err();
            assert!(matches!(err, CellwireError::InvalidPhase { phase, .. } if phase == before));
            assert_eq!(machine.phase(), before);
        }
    }

    #[test]
    fn test_choose_spreadsheet_rejects_newline() {
        let mut machine = awaiting_choice();
        let err = machine.choose_spreadsheet("Sheet\n1").unwrap_err();
        assert!(matches!(err, CellwireError::EmbeddedNewline { .. }));
        assert_eq!(machine.phase(), ConnectionPhase::AwaitingSpreadsheetChoice);
    }

    #[test]
    fn test_id_assignment() {
        let mut machine = awaiting_id();
        let actions = machine.on_received(conn(), &mut buffer("42\n"));

        assert_eq!(machine.phase(), ConnectionPhase::Active);
        assert_eq!(machine.client_id(), Some(42));
        assert_eq!(
            actions,
            vec![
                ClientAction::Publish(ClientEvent::IdAssigned { id: 42 }),
                ClientAction::Receive { connection: conn() },
            ]
        );
    }

    #[test]
    fn test_existing_state_precedes_id() {
        let mut machine = awaiting_id();
        let mut data = buffer(concat!(
            r#"{"messageType":"cellUpdated","cellName":"A1","contents":"5"}"#,
            "\n",
            r#"{"messageType":"cellSelected","cellName":"B2","selector":3,"selectorName":"bob"}"#,
            "\n",
            "42\n",
            r#"{"messageType":"cellUpdated","cellName":"C3","contents":"=A1"}"#,
            "\n",
        ));

        let actions = machine.on_received(conn(), &mut data);

        assert_eq!(machine.phase(), ConnectionPhase::Active);
        assert_eq!(
            published(&actions),
            vec![
                ClientEvent::CellUpdated {
                    cell: "A1".into(),
                    contents: "5".into()
                },
                ClientEvent::CellSelected {
                    cell: "B2".into(),
                    selector_name: "bob".into(),
                    selector_id: 3
                },
                ClientEvent::IdAssigned { id: 42 },
                ClientEvent::CellUpdated {
                    cell: "C3".into(),
                    contents: "=A1".into()
                },
            ]
        );
        assert_eq!(
            actions.last(),
            Some(&ClientAction::Receive { connection: conn() })
        );
    }

    #[test]
    fn test_non_json_before_id_is_dropped() {
        let mut machine = awaiting_id();
        let actions = machine.on_received(conn(), &mut buffer("hello there\n"));

        assert_eq!(machine.phase(), ConnectionPhase::AwaitingAssignedId);
        assert_eq!(actions, vec![ClientAction::Receive { connection: conn() }]);
    }

    #[test]
    fn test_out_of_range_id_is_not_assigned() {
        let mut machine = awaiting_id();
        let mut data = buffer("99999999999\n");

        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(machine.phase(), ConnectionPhase::AwaitingAssignedId);
        assert_eq!(actions, vec![ClientAction::Receive { connection: conn() }]);

        data.append(b"42\n");
        machine.on_received(conn(), &mut data);
        assert_eq!(machine.client_id(), Some(42));
    }

    #[test]
    fn test_partial_record_waits_for_rest() {
        let mut machine = active();
        let mut data = buffer(r#"{"messageType":"cellUpd"#);

        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(actions, vec![ClientAction::Receive { connection: conn() }]);

        data.append(b"ated\",\"cellName\":\"A1\",\"contents\":\"5\"}\n");
        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(
            published(&actions),
            vec![ClientEvent::CellUpdated {
                cell: "A1".into(),
                contents: "5".into()
            }]
        );
    }

    #[test]
    fn test_active_dispatches_each_message_kind() {
        let mut machine = active();
        let mut data = buffer(concat!(
            r#"{"messageType":"disconnected","selector":"5"}"#,
            "\n",
            r#"{"messageType":"requestError","cellName":"A1","message":"circular"}"#,
            "\n",
            r#"{"messageType":"somethingNew"}"#,
            "\n",
        ));

        let actions = machine.on_received(conn(), &mut data);
        assert_eq!(
            published(&actions),
            vec![
                ClientEvent::ClientLeft { id: 5 },
                ClientEvent::ChangeRejected {
                    cell: "A1".into(),
                    reason: "circular".into()
                },
            ]
        );
        assert_eq!(machine.phase(), ConnectionPhase::Active);
    }

    #[test]
    fn test_server_error_ends_session() {
        let mut machine = active();
        let mut data = buffer(concat!(
            r#"{"messageType":"serverError","message":"shutting down"}"#,
            "\n",
            r#"{"messageType":"cellUpdated","cellName":"A1","contents":"late"}"#,
            "\n",
        ));

        let actions = machine.on_received(conn(), &mut data);

        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
        assert_eq!(
            actions,
            vec![
                ClientAction::Close { connection: conn() },
                ClientAction::Publish(ClientEvent::Disconnected {
                    reason: "shutting down".into()
                }),
            ]
        );
    }

    #[test]
    fn test_server_error_while_awaiting_id() {
        let mut machine = awaiting_id();
        let actions = machine.on_received(
            conn(),
            &mut buffer("{\"messageType\":\"serverError\",\"message\":\"full\"}\n"),
        );

        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
        assert_eq!(
            published(&actions),
            vec![ClientEvent::Disconnected {
                reason: "full".into()
            }]
        );
    }

    #[test]
    fn test_send_command_only_when_active() {
        let command = Command::EditCell {
            cell: "A1".into(),
            contents: "5".into(),
        };

        let err = awaiting_id().send_command(&command).unwrap_err();
        assert!(matches!(err, CellwireError::InvalidPhase { .. }));

        let actions = active().send_command(&command).unwrap();
        assert_eq!(
            actions,
            vec![ClientAction::Send {
                connection: conn(),
                data: "{\"requestType\":\"editCell\",\"cellName\":\"A1\",\"contents\":\"5\"}\n"
                    .into()
            }]
        );
    }

    #[test]
    fn test_transport_error_then_stale_callbacks() {
        let mut machine = active();
        let actions = machine.on_transport_error(conn(), "Connection reset by peer");

        assert_eq!(machine.phase(), ConnectionPhase::Disconnected);
        assert_eq!(
            actions,
            vec![
                ClientAction::Close { connection: conn() },
                ClientAction::Publish(ClientEvent::Disconnected {
                    reason: "Connection reset by peer".into()
                }),
            ]
        );

        assert!(machine.on_transport_error(conn(), "again").is_empty());
        assert!(machine
            .on_received(conn(), &mut buffer("{\"messageType\":\"cellUpdated\",\"cellName\":\"A1\"}\n"))
            .is_empty());
    }

    #[test]
    fn test_transport_error_during_handshake() {
        let mut machine = awaiting_roster();
        let actions = machine.on_transport_error(conn(), "Connection closed by peer");
        assert_eq!(
            published(&actions),
            vec![ClientEvent::Disconnected {
                reason: "Connection closed by peer".into()
            }]
        );
    }

    #[test]
    fn test_events_from_other_connection_ignored() {
        let mut machine = active();
        let other = ConnectionId::from(CONN + 1);

        assert!(machine.on_transport_error(other, "boom").is_empty());
        assert_eq!(machine.phase(), ConnectionPhase::Active);
    }

    #[test]
    fn test_user_disconnect() {
        let mut machine = active();
        let actions = machine.disconnect().unwrap();

        assert_eq!(
            actions,
            vec![
                ClientAction::Close { connection: conn() },
                ClientAction::Publish(ClientEvent::Disconnected {
                    reason: USER_DISCONNECTED.into()
                }),
            ]
        );
        assert_eq!(machine.client_id(), None);
        assert!(matches!(
            machine.disconnect(),
            Err(CellwireError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_reconnect_uses_new_attempt() {
        let (mut machine, first) = connecting();
        machine.on_connect_failed(first, "refused");

        let actions = machine.connect("localhost", 1100, "alice").unwrap();
        assert!(matches!(
            &actions[..],
            [ClientAction::Connect { attempt, .. }] if *attempt != first
        ));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConnectionPhase::Active.to_string(), "active");
        let err = CellwireError::InvalidPhase {
            phase: ConnectionPhase::Disconnected,
            operation: "disconnect",
        };
        assert_eq!(err.to_string(), "cannot disconnect while disconnected");
    }
}
