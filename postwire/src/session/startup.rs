//! Startup and authentication phase.
use std::fmt;

use super::{Event, Kind, Session};
use crate::{
    auth::{AuthError, SCRAM_SHA_256, ScramClient, md5_password},
    common::{ByteStr, report, verbose},
    postgres::{
        BackendMessage, ProtocolError,
        backend::{Authentication, BackendKeyData, ReadyForQuery},
        frontend,
    },
    Error,
};

/// Parameters sent in the startup message.
#[derive(Clone, Default)]
pub struct StartupConfig {
    /// The database user name to connect as.
    pub user: String,
    /// The database to connect to, defaults to the user name.
    pub database: Option<String>,
    /// Password used if the server requests one.
    pub password: Option<String>,
    /// Other run-time parameters, such as `application_name`.
    pub params: Vec<(ByteStr, ByteStr)>,
}

impl fmt::Debug for StartupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupConfig")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .finish()
    }
}

/// Authentication method requested by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Trust,
    Cleartext,
    Md5,
    ScramSha256,
}

/// Cancellation key of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: u32,
    pub secret_key: u32,
}

/// Credentials kept until the server accepts them.
pub(super) struct Credentials {
    user: String,
    password: Option<String>,
    scram: Option<Scram>,
}

enum Scram {
    Started(ScramClient),
    Final { auth_message: String, salted: Vec<u8> },
}

impl Credentials {
    pub(super) fn new(config: &StartupConfig) -> Credentials {
        Credentials {
            user: config.user.clone(),
            password: config.password.clone(),
            scram: None,
        }
    }

    fn password(&self) -> Result<&str, AuthError> {
        self.password.as_deref().ok_or(AuthError::MissingPassword)
    }
}

impl Session {
    pub(super) fn handle_startup(&mut self, msg: BackendMessage) -> Result<(), Error> {
        match msg {
            BackendMessage::Authentication(auth) => self.authenticate(auth),
            BackendMessage::BackendKeyData(BackendKeyData { process_id, secret_key }) => {
                self.backend_key = Some(BackendKey { process_id, secret_key });
                Ok(())
            }
            BackendMessage::NegotiateProtocolVersion(v) => {
                report!(warn, "server supports protocol minor version {} only, unrecognized options: {:?}", v.minor, v.options);
                Ok(())
            }
            BackendMessage::ErrorResponse(e) => Err(AuthError::Rejected(e.fields).into()),
            BackendMessage::ReadyForQuery(r) if self.authenticated => {
                let Some(head) = self.pending.pop_front().filter(|p| p.kind == Kind::Startup) else {
                    return Err(ProtocolError::unexpected_phase(ReadyForQuery::MSGTYPE, "startup").into());
                };
                self.credentials = None;
                self.status = r.status;
                self.events.push_back(Event::Ready { id: head.id, status: r.status });
                Ok(())
            }
            msg => Err(ProtocolError::unexpected_phase(msg.msgtype(), "startup").into()),
        }
    }

    fn authenticate(&mut self, auth: Authentication) -> Result<(), Error> {
        verbose!(method = auth.method_name(), "authentication request");

        let Some(cred) = self.credentials.as_mut() else {
            return Err(ProtocolError::unexpected_phase(Authentication::MSGTYPE, "authenticated").into());
        };

        match auth {
            Authentication::Ok => {
                // `SASLFinal` clears the exchange once the server is verified
                if cred.scram.is_some() {
                    return Err(AuthError::Scram("server skipped SCRAM final message".into()).into());
                }
                self.mechanism.get_or_insert(AuthMechanism::Trust);
                self.authenticated = true;
            }
            Authentication::CleartextPassword => {
                self.mechanism = Some(AuthMechanism::Cleartext);
                let password = cred.password()?;
                frontend::write(frontend::PasswordMessage { password }, &mut self.write_buf);
            }
            Authentication::MD5Password { salt } => {
                self.mechanism = Some(AuthMechanism::Md5);
                let password = md5_password(&cred.user, cred.password()?, salt);
                frontend::write(frontend::PasswordMessage { password: &password }, &mut self.write_buf);
            }
            Authentication::SASL { mechanisms } => {
                if !mechanisms.iter().any(|m| m.as_str() == SCRAM_SHA_256) {
                    let offered = mechanisms.iter().map(ByteStr::as_str).collect::<Vec<_>>().join(", ");
                    return Err(AuthError::Unsupported(format!("SASL {offered}").into()).into());
                }
                cred.password()?;
                self.mechanism = Some(AuthMechanism::ScramSha256);
                // the server use the startup user name
                let client = ScramClient::new("");
                frontend::write(
                    frontend::SaslInitialResponse {
                        mechanism: SCRAM_SHA_256,
                        data: client.client_first.as_bytes(),
                    },
                    &mut self.write_buf,
                );
                cred.scram = Some(Scram::Started(client));
            }
            Authentication::SASLContinue { data } => {
                let Some(Scram::Started(client)) = cred.scram.take() else {
                    return Err(AuthError::Scram("unexpected SASL continue".into()).into());
                };
                let server_first = std::str::from_utf8(&data)
                    .map_err(|_| AuthError::Scram("server-first is not utf8".into()))?;
                let (client_final, auth_message, salted) = client.client_final(cred.password()?, server_first)?;
                frontend::write(frontend::SaslResponse { data: client_final.as_bytes() }, &mut self.write_buf);
                cred.scram = Some(Scram::Final { auth_message, salted });
            }
            Authentication::SASLFinal { data } => {
                let Some(Scram::Final { auth_message, salted }) = cred.scram.take() else {
                    return Err(AuthError::Scram("unexpected SASL final".into()).into());
                };
                let server_final = std::str::from_utf8(&data)
                    .map_err(|_| AuthError::Scram("server-final is not utf8".into()))?;
                ScramClient::verify_server_final(server_final, &salted, &auth_message)?;
            }
            other => return Err(AuthError::Unsupported(other.method_name().into()).into()),
        }

        Ok(())
    }
}
