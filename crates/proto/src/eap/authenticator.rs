//! Top-level EAP state machine
//!
//! One [`EapAuthenticator`] drives a single EAP session: it decodes each
//! inbound packet, selects or constructs the method state machine the
//! server asked for, answers Notification requests in place, and Naks
//! requests for methods the session is not configured for. Exactly one
//! method is active at a time.

use super::aka::EapAkaStateMachine;
use super::message::{EapCode, EapMessage};
use super::mschapv2::EapMsChapV2StateMachine;
use super::sim::EapSimStateMachine;
use super::{
    EapSessionConfig, MethodOutcome, EAP_TYPE_AKA, EAP_TYPE_AKA_PRIME, EAP_TYPE_IDENTITY,
    EAP_TYPE_MSCHAP_V2, EAP_TYPE_NOTIFICATION, EAP_TYPE_SIM,
};
use crate::ike::{Error, Result};
use burrow_platform::{SimAuthenticator, SubscriberIdSource};

/// What the authenticator produced for one inbound EAP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapResult {
    /// A full EAP packet to send back to the server
    Response(Vec<u8>),
    /// EAP completed successfully; keys are exported to the IKE session
    Success {
        /// Master Session Key
        msk: Vec<u8>,
        /// Extended Master Session Key
        emsk: Vec<u8>,
    },
    /// EAP concluded in failure
    Failure,
}

enum ActiveMethod {
    Sim(EapSimStateMachine),
    Aka(EapAkaStateMachine),
    MsChapV2(EapMsChapV2StateMachine),
}

impl ActiveMethod {
    fn type_code(&self) -> u8 {
        match self {
            ActiveMethod::Sim(m) => m.method_type(),
            ActiveMethod::Aka(m) => m.method_type(),
            ActiveMethod::MsChapV2(m) => m.method_type(),
        }
    }
}

/// Top-level EAP authenticator (peer side)
pub struct EapAuthenticator {
    config: EapSessionConfig,
    sim: Option<Box<dyn SimAuthenticator>>,
    subscriber: Option<Box<dyn SubscriberIdSource>>,
    active: Option<ActiveMethod>,
}

impl EapAuthenticator {
    /// Create an authenticator for one EAP session.
    ///
    /// The SIM applet and subscriber source are only needed when a
    /// SIM/AKA method is configured.
    pub fn new(
        config: EapSessionConfig,
        sim: Option<Box<dyn SimAuthenticator>>,
        subscriber: Option<Box<dyn SubscriberIdSource>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(EapAuthenticator {
            config,
            sim,
            subscriber,
            active: None,
        })
    }

    /// Process one inbound EAP packet and produce the next action.
    pub fn process_packet(&mut self, packet: &[u8]) -> Result<EapResult> {
        let message = EapMessage::decode(packet)?;

        match message.code {
            EapCode::Success | EapCode::Failure => {
                // Only a method that has run to its final exchange may
                // accept a bare Success/Failure
                match self.active.as_mut() {
                    Some(method) => {
                        let outcome = Self::dispatch(
                            method,
                            &message,
                            &mut self.sim,
                            &self.subscriber,
                        )?;
                        Ok(Self::lift(outcome, &message))
                    }
                    None => Err(Error::InvalidRequest(
                        "EAP Success/Failure before any method ran".into(),
                    )),
                }
            }
            EapCode::Response => Err(Error::InvalidRequest(
                "Peer received an EAP-Response".into(),
            )),
            EapCode::Request => self.process_request(&message),
        }
    }

    fn process_request(&mut self, message: &EapMessage) -> Result<EapResult> {
        let data = message
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("EAP request without type".into()))?;

        match data.type_code {
            EAP_TYPE_NOTIFICATION => {
                // Answered without advancing any method state
                tracing::debug!("EAP notification request");
                Ok(EapResult::Response(
                    EapMessage::notification_response(message.identifier).encode(),
                ))
            }
            EAP_TYPE_IDENTITY => Ok(EapResult::Response(
                EapMessage::response(
                    message.identifier,
                    EAP_TYPE_IDENTITY,
                    self.config.identity.clone(),
                )
                .encode(),
            )),
            requested => {
                if let Some(active) = &self.active {
                    if active.type_code() != requested {
                        return Err(Error::InvalidRequest(format!(
                            "Server switched method from {} to {}",
                            active.type_code(),
                            requested
                        )));
                    }
                } else if self.config.supports(requested) {
                    self.active = Some(self.construct_method(requested)?);
                } else {
                    // Nak with the methods we would accept
                    tracing::debug!(requested, "Nak for unconfigured EAP method");
                    return Ok(EapResult::Response(
                        EapMessage::nak_response(
                            message.identifier,
                            &self.config.configured_types(),
                        )
                        .encode(),
                    ));
                }

                let method = self.active.as_mut().expect("method set above");
                let outcome =
                    Self::dispatch(method, message, &mut self.sim, &self.subscriber)?;
                Ok(Self::lift(outcome, message))
            }
        }
    }

    fn construct_method(&self, type_code: u8) -> Result<ActiveMethod> {
        let method = match type_code {
            EAP_TYPE_SIM => {
                let config = self
                    .config
                    .sim
                    .clone()
                    .ok_or_else(|| Error::Internal("EAP-SIM not configured".into()))?;
                ActiveMethod::Sim(EapSimStateMachine::new(config))
            }
            EAP_TYPE_AKA => {
                let config = self
                    .config
                    .aka
                    .clone()
                    .ok_or_else(|| Error::Internal("EAP-AKA not configured".into()))?;
                ActiveMethod::Aka(EapAkaStateMachine::new_aka(config))
            }
            EAP_TYPE_AKA_PRIME => {
                let config = self
                    .config
                    .aka_prime
                    .clone()
                    .ok_or_else(|| Error::Internal("EAP-AKA' not configured".into()))?;
                ActiveMethod::Aka(EapAkaStateMachine::new_aka_prime(config))
            }
            EAP_TYPE_MSCHAP_V2 => {
                let config = self
                    .config
                    .mschapv2
                    .clone()
                    .ok_or_else(|| Error::Internal("EAP-MSCHAPv2 not configured".into()))?;
                ActiveMethod::MsChapV2(EapMsChapV2StateMachine::new(config))
            }
            other => {
                return Err(Error::Internal(format!(
                    "No constructor for EAP type {}",
                    other
                )))
            }
        };

        Ok(method)
    }

    fn dispatch(
        method: &mut ActiveMethod,
        message: &EapMessage,
        sim: &mut Option<Box<dyn SimAuthenticator>>,
        subscriber: &Option<Box<dyn SubscriberIdSource>>,
    ) -> Result<MethodOutcome> {
        match method {
            ActiveMethod::MsChapV2(machine) => machine.process(message),
            ActiveMethod::Sim(machine) => {
                let sim = sim
                    .as_mut()
                    .ok_or_else(|| Error::Unavailable("SIM applet".into()))?;
                let subscriber = subscriber
                    .as_ref()
                    .ok_or_else(|| Error::Unavailable("subscriber identity source".into()))?;
                machine.process(message, sim.as_mut(), subscriber.as_ref())
            }
            ActiveMethod::Aka(machine) => {
                let sim = sim
                    .as_mut()
                    .ok_or_else(|| Error::Unavailable("SIM applet".into()))?;
                let subscriber = subscriber
                    .as_ref()
                    .ok_or_else(|| Error::Unavailable("subscriber identity source".into()))?;
                machine.process(message, sim.as_mut(), subscriber.as_ref())
            }
        }
    }

    fn lift(outcome: MethodOutcome, request: &EapMessage) -> EapResult {
        match outcome {
            MethodOutcome::Response(type_data) => {
                let type_code = request
                    .data
                    .as_ref()
                    .map(|d| d.type_code)
                    .unwrap_or_default();
                EapResult::Response(
                    EapMessage::response(request.identifier, type_code, type_data).encode(),
                )
            }
            MethodOutcome::Success { msk, emsk } => EapResult::Success { msk, emsk },
            MethodOutcome::Failure => EapResult::Failure,
        }
    }
}
