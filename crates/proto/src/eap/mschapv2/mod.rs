//! EAP-MSCHAPv2 method state machine
//!
//! Peer-side flow (draft-kamath-pppext-eap-mschapv2):
//!
//! ```text
//! Created ──Challenge──▶ ChallengeResponse ──▶ AwaitingSuccessOrFailure
//!                                                   │ Success/Failure req
//!                                                   ▼
//!                                                 Final ──EAP-Success/Failure──▶ outcome
//! ```
//!
//! The server's Success request carries an authenticator response string
//! which is verified in constant time before the success acknowledgement
//! is sent.

pub mod auth;
pub mod typedata;

use super::message::{EapCode, EapMessage};
use super::{EapMsChapV2Config, MethodOutcome, EAP_TYPE_MSCHAP_V2};
use crate::ike::{Error, Result};
use rand::RngCore;
use typedata::{
    encode_failure_response, encode_success_response, ChallengeRequest, ChallengeResponse,
    FailureRequest, SuccessRequest, OP_CHALLENGE, OP_FAILURE, OP_SUCCESS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    ChallengeResponse,
    AwaitingSuccessOrFailure,
    Final,
}

/// What the Final state will report when the server concludes the session
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingResult {
    Success { msk: Vec<u8>, emsk: Vec<u8> },
    Failure,
}

/// EAP-MSCHAPv2 method state machine
#[derive(Debug)]
pub struct EapMsChapV2StateMachine {
    config: EapMsChapV2Config,
    state: State,
    authenticator_challenge: Option<[u8; 16]>,
    peer_challenge: Option<[u8; 16]>,
    nt_response: Option<[u8; 24]>,
    pending: Option<PendingResult>,
}

impl EapMsChapV2StateMachine {
    /// Create a machine in the `Created` state.
    pub fn new(config: EapMsChapV2Config) -> Self {
        EapMsChapV2StateMachine {
            config,
            state: State::Created,
            authenticator_challenge: None,
            peer_challenge: None,
            nt_response: None,
            pending: None,
        }
    }

    /// The EAP method type this machine implements
    pub fn method_type(&self) -> u8 {
        EAP_TYPE_MSCHAP_V2
    }

    /// Process one EAP message addressed to this method.
    pub fn process(&mut self, message: &EapMessage) -> Result<MethodOutcome> {
        match message.code {
            EapCode::Success | EapCode::Failure => self.process_result_code(message.code),
            EapCode::Request => self.process_request(message),
            EapCode::Response => Err(Error::InvalidRequest(
                "Peer cannot receive an EAP-Response".into(),
            )),
        }
    }

    fn process_result_code(&mut self, code: EapCode) -> Result<MethodOutcome> {
        if code == EapCode::Failure {
            self.state = State::Final;
            self.pending = None;
            return Ok(MethodOutcome::Failure);
        }

        // EAP-Success is only meaningful once the Success request exchange
        // completed
        if self.state == State::Final {
            if let Some(PendingResult::Success { msk, emsk }) = self.pending.take() {
                return Ok(MethodOutcome::Success { msk, emsk });
            }
        }
        Err(Error::InvalidRequest(
            "EAP-Success before MSCHAPv2 completion".into(),
        ))
    }

    fn process_request(&mut self, message: &EapMessage) -> Result<MethodOutcome> {
        let data = message
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("EAP request without type data".into()))?;
        if data.type_code != EAP_TYPE_MSCHAP_V2 {
            return Err(Error::InvalidRequest(format!(
                "Type {} routed to MSCHAPv2 method",
                data.type_code
            )));
        }
        let type_data = &data.type_data;
        let op_code = *type_data
            .first()
            .ok_or_else(|| Error::InvalidRequest("Empty MSCHAPv2 type data".into()))?;

        match (self.state, op_code) {
            (State::Created, OP_CHALLENGE) => self.process_challenge(type_data),
            (State::AwaitingSuccessOrFailure, OP_SUCCESS) => self.process_success(type_data),
            (State::AwaitingSuccessOrFailure, OP_FAILURE) => self.process_failure(type_data),
            (State::Final, _) => Err(Error::InvalidRequest(
                "MSCHAPv2 session already concluded".into(),
            )),
            (_, op) => Err(Error::InvalidRequest(format!(
                "Unexpected MSCHAPv2 op-code {} in current state",
                op
            ))),
        }
    }

    fn process_challenge(&mut self, type_data: &[u8]) -> Result<MethodOutcome> {
        let request = ChallengeRequest::decode(type_data)?;
        self.state = State::ChallengeResponse;

        let mut peer_challenge = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut peer_challenge);

        let nt_response = auth::generate_nt_response(
            &request.challenge,
            &peer_challenge,
            &self.config.username,
            &self.config.password,
        )?;

        let response = ChallengeResponse {
            mschapv2_id: request.mschapv2_id,
            peer_challenge,
            nt_response,
            name: auth::username_to_bytes(&self.config.username)?,
        };

        self.authenticator_challenge = Some(request.challenge);
        self.peer_challenge = Some(peer_challenge);
        self.nt_response = Some(nt_response);
        self.state = State::AwaitingSuccessOrFailure;

        Ok(MethodOutcome::Response(response.encode()))
    }

    fn process_success(&mut self, type_data: &[u8]) -> Result<MethodOutcome> {
        let request = SuccessRequest::decode(type_data)?;

        let authenticator_challenge = self
            .authenticator_challenge
            .ok_or_else(|| Error::Internal("Challenge state missing".into()))?;
        let peer_challenge = self
            .peer_challenge
            .ok_or_else(|| Error::Internal("Peer challenge missing".into()))?;
        let nt_response = self
            .nt_response
            .ok_or_else(|| Error::Internal("NT-Response missing".into()))?;

        let valid = auth::check_authenticator_response(
            &self.config.password,
            &nt_response,
            &peer_challenge,
            &authenticator_challenge,
            &self.config.username,
            &request.authenticator_response,
        )?;

        if !valid {
            self.state = State::Final;
            self.pending = Some(PendingResult::Failure);
            return Err(Error::AuthenticationFailed(
                "MSCHAPv2 authenticator response mismatch".into(),
            ));
        }

        let (msk, emsk) = auth::derive_session_keys(&self.config.password, &nt_response);
        self.state = State::Final;
        self.pending = Some(PendingResult::Success { msk, emsk });

        Ok(MethodOutcome::Response(encode_success_response()))
    }

    fn process_failure(&mut self, type_data: &[u8]) -> Result<MethodOutcome> {
        let request = FailureRequest::decode(type_data)?;
        tracing::debug!(
            error_code = ?request.error_code,
            retry = request.retry_allowed,
            "MSCHAPv2 failure request"
        );

        self.state = State::Final;
        self.pending = Some(PendingResult::Failure);

        Ok(MethodOutcome::Response(encode_failure_response()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::message::EapData;

    const USERNAME: &str = "User";
    const PASSWORD: &str = "clientPass";

    fn machine() -> EapMsChapV2StateMachine {
        EapMsChapV2StateMachine::new(EapMsChapV2Config {
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
        })
    }

    fn challenge_request(id: u8) -> EapMessage {
        let mut type_data = vec![typedata::OP_CHALLENGE, 0x2A];
        type_data.extend_from_slice(&((5 + 16 + 4) as u16).to_be_bytes());
        type_data.push(typedata::CHALLENGE_VALUE_SIZE);
        type_data.extend_from_slice(&[0x5B; 16]);
        type_data.extend_from_slice(b"srv1");

        EapMessage {
            code: EapCode::Request,
            identifier: id,
            data: Some(EapData::new(EAP_TYPE_MSCHAP_V2, type_data)),
        }
    }

    fn drive_to_awaiting(machine: &mut EapMsChapV2StateMachine) -> Vec<u8> {
        match machine.process(&challenge_request(1)).unwrap() {
            MethodOutcome::Response(bytes) => bytes,
            other => panic!("Expected response, got {:?}", other),
        }
    }

    fn success_request_for(machine: &EapMsChapV2StateMachine, response: &[u8]) -> EapMessage {
        // Reconstruct the values the peer used from its emitted response
        let mut peer_challenge = [0u8; 16];
        peer_challenge.copy_from_slice(&response[5..21]);
        let mut nt_response = [0u8; 24];
        nt_response.copy_from_slice(&response[29..53]);

        let auth_response = auth::generate_authenticator_response(
            PASSWORD,
            &nt_response,
            &peer_challenge,
            &machine.authenticator_challenge.unwrap(),
            USERNAME,
        )
        .unwrap();

        let body = format!("{} M=OK", auth_response);
        let mut type_data = vec![typedata::OP_SUCCESS, 0x2A];
        type_data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        type_data.extend_from_slice(body.as_bytes());

        EapMessage {
            code: EapCode::Request,
            identifier: 2,
            data: Some(EapData::new(EAP_TYPE_MSCHAP_V2, type_data)),
        }
    }

    #[test]
    fn test_starts_in_created() {
        let machine = machine();
        assert_eq!(machine.state, State::Created);
        assert_eq!(machine.method_type(), EAP_TYPE_MSCHAP_V2);
    }

    #[test]
    fn test_challenge_produces_response() {
        let mut machine = machine();
        let response = drive_to_awaiting(&mut machine);

        assert_eq!(machine.state, State::AwaitingSuccessOrFailure);
        assert_eq!(response[0], typedata::OP_RESPONSE);
        assert_eq!(response[1], 0x2A);
        assert_eq!(response[4], typedata::RESPONSE_VALUE_SIZE);
        assert_eq!(response[53], 0); // flags
        assert_eq!(&response[54..], b"User");
    }

    #[test]
    fn test_full_success_flow() {
        let mut machine = machine();
        let response = drive_to_awaiting(&mut machine);

        let success = success_request_for(&machine, &response);
        let ack = machine.process(&success).unwrap();
        assert_eq!(
            ack,
            MethodOutcome::Response(vec![typedata::OP_SUCCESS])
        );
        assert_eq!(machine.state, State::Final);

        // Server's EAP-Success yields the session keys
        let eap_success = EapMessage::new(EapCode::Success, 3, None).unwrap();
        match machine.process(&eap_success).unwrap() {
            MethodOutcome::Success { msk, emsk } => {
                assert_eq!(msk.len(), auth::SESSION_KEY_LEN);
                assert_eq!(emsk.len(), auth::SESSION_KEY_LEN);
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_authenticator_response_fails() {
        let mut machine = machine();
        let response = drive_to_awaiting(&mut machine);

        let mut success = success_request_for(&machine, &response);
        // Corrupt one hex digit of the S= string
        if let Some(data) = &mut success.data {
            data.type_data[10] ^= 0x01;
        }

        let result = machine.process(&success);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
        assert_eq!(machine.state, State::Final);
    }

    #[test]
    fn test_failure_request_acknowledged() {
        let mut machine = machine();
        drive_to_awaiting(&mut machine);

        let body = b"E=691 R=0 V=3";
        let mut type_data = vec![typedata::OP_FAILURE, 0x2A];
        type_data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        type_data.extend_from_slice(body);

        let failure = EapMessage {
            code: EapCode::Request,
            identifier: 2,
            data: Some(EapData::new(EAP_TYPE_MSCHAP_V2, type_data)),
        };

        let ack = machine.process(&failure).unwrap();
        assert_eq!(ack, MethodOutcome::Response(vec![typedata::OP_FAILURE]));

        let eap_failure = EapMessage::new(EapCode::Failure, 3, None).unwrap();
        assert_eq!(
            machine.process(&eap_failure).unwrap(),
            MethodOutcome::Failure
        );
    }

    #[test]
    fn test_premature_eap_success_rejected() {
        let mut machine = machine();
        let eap_success = EapMessage::new(EapCode::Success, 1, None).unwrap();
        assert!(matches!(
            machine.process(&eap_success),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_final_state_rejects_further_requests() {
        let mut machine = machine();
        let response = drive_to_awaiting(&mut machine);
        let success = success_request_for(&machine, &response);
        machine.process(&success).unwrap();

        let result = machine.process(&challenge_request(9));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_success_op_in_created_rejected() {
        let mut machine = machine();
        let mut type_data = vec![typedata::OP_SUCCESS, 0x2A];
        type_data.extend_from_slice(&4u16.to_be_bytes());

        let message = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(EapData::new(EAP_TYPE_MSCHAP_V2, type_data)),
        };
        assert!(matches!(
            machine.process(&message),
            Err(Error::InvalidRequest(_))
        ));
    }
}
