use crate::domain::session::{FlowState, PaymentIntent, PaymentSession};
use crate::error::FlowError;
use tokio_util::sync::CancellationToken;

/// Successful result of one reader SDK operation within a flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Retrieved(PaymentIntent),
    Collected(PaymentIntent),
    Confirmed(PaymentIntent),
}

impl FlowStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retrieved(_) => "retrieved",
            Self::Collected(_) => "collected",
            Self::Confirmed(_) => "confirmed",
        }
    }
}

/// What the orchestrator has to do after a step was accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowAction {
    Collect(PaymentIntent),
    Confirm(PaymentIntent),
    Succeed { intent_id: String },
}

/// One claimed session on its way to `Succeeded` or `Failed`.
///
/// The flow is linear; a state is never re-entered. Every SDK operation it
/// starts shares the flow's cancellation token, so aborting the flow cancels
/// whatever operation is in flight.
#[derive(Debug)]
pub struct PaymentFlow {
    id: u64,
    session: PaymentSession,
    state: FlowState,
    cancel: CancellationToken,
}

impl PaymentFlow {
    pub fn claim(id: u64, session: PaymentSession) -> Self {
        Self {
            id,
            session,
            state: FlowState::Claimed,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &PaymentSession {
        &self.session
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Token to hand to cancelable SDK operations of this flow.
    pub fn operation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The backend has been told the session is processing.
    pub fn mark_processing(&mut self) -> Result<(), FlowError> {
        self.expect(FlowState::Claimed, "processing")?;
        self.state = FlowState::NotifiedProcessing;
        Ok(())
    }

    pub fn advance(&mut self, step: FlowStep) -> Result<FlowAction, FlowError> {
        let name = step.name();
        match (self.state, step) {
            (FlowState::NotifiedProcessing, FlowStep::Retrieved(intent)) => {
                self.state = FlowState::Collecting;
                Ok(FlowAction::Collect(intent))
            }
            (FlowState::Collecting, FlowStep::Collected(intent)) => {
                self.state = FlowState::Confirming;
                Ok(FlowAction::Confirm(intent))
            }
            (FlowState::Confirming, FlowStep::Confirmed(intent)) => {
                self.state = FlowState::Succeeded;
                Ok(FlowAction::Succeed {
                    intent_id: intent.id,
                })
            }
            (state, _) => Err(FlowError::UnexpectedStep { state, step: name }),
        }
    }

    pub fn fail(&mut self) -> Result<(), FlowError> {
        if self.state.is_terminal() {
            return Err(FlowError::UnexpectedStep {
                state: self.state,
                step: "fail",
            });
        }
        self.state = FlowState::Failed;
        Ok(())
    }

    /// Cancels the in-flight SDK operation, if any. Does not wait for it.
    pub fn cancel_operation(&self) {
        self.cancel.cancel();
    }

    fn expect(&self, state: FlowState, step: &'static str) -> Result<(), FlowError> {
        if self.state == state {
            Ok(())
        } else {
            Err(FlowError::UnexpectedStep {
                state: self.state,
                step,
            })
        }
    }
}
