//! Scripted in-memory gateway
//!
//! [`MockGateway`] answers from staged state and records the requests it
//! sees, so pipeline tests can assert paging, batching and retry behavior
//! without a network. Mutating calls (execute, broadcast, delegate) pop
//! scripted responses in order and fail loudly when nothing is scripted.

use crate::gateway::{
    ChainGateway, DelegatedStatus, DelegationRequest, ExecutionRequest, ExecutionResponse,
    RecordInfo, SerialNumberStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use obscura_core::OwnershipCandidate;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Default)]
struct MockState {
    height: u32,
    programs: HashMap<String, String>,
    candidate_pages: HashMap<(u32, u32), Vec<Vec<OwnershipCandidate>>>,
    records: HashMap<(String, u32), RecordInfo>,
    serial_statuses: HashMap<String, SerialNumberStatus>,
    execute_queue: VecDeque<Result<ExecutionResponse>>,
    broadcast_queue: VecDeque<Result<String>>,
    delegate_queue: VecDeque<Result<String>>,
    delegated: HashMap<String, DelegatedStatus>,
    candidate_calls: Vec<(u32, u32, u32)>,
    serial_batches: Vec<Vec<String>>,
    program_calls: Vec<String>,
    broadcasts: Vec<String>,
    delegations: Vec<DelegationRequest>,
    executions: Vec<ExecutionRequest>,
}

/// In-memory [`ChainGateway`] for tests
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    /// An empty gateway at height 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the latest block height
    pub fn set_height(&self, height: u32) {
        self.state.lock().height = height;
    }

    /// Stage a program source
    pub fn add_program(&self, program_id: impl Into<String>, source: impl Into<String>) {
        self.state
            .lock()
            .programs
            .insert(program_id.into(), source.into());
    }

    /// Stage candidate pages for a block range. Pages beyond the staged
    /// list come back empty, which is how a range reports exhaustion.
    pub fn stage_candidate_pages(
        &self,
        start: u32,
        end: u32,
        pages: Vec<Vec<OwnershipCandidate>>,
    ) {
        self.state.lock().candidate_pages.insert((start, end), pages);
    }

    /// Stage a record payload for hydration
    pub fn add_record(&self, info: RecordInfo) {
        self.state
            .lock()
            .records
            .insert((info.transition_id.clone(), info.output_index), info);
    }

    /// Stage a serial number status
    pub fn set_serial_status(&self, status: SerialNumberStatus) {
        self.state
            .lock()
            .serial_statuses
            .insert(status.serial_number.clone(), status);
    }

    /// Script the next execute_authorization outcome
    pub fn queue_execution(&self, outcome: Result<ExecutionResponse>) {
        self.state.lock().execute_queue.push_back(outcome);
    }

    /// Script the next broadcast_transaction outcome
    pub fn queue_broadcast(&self, outcome: Result<String>) {
        self.state.lock().broadcast_queue.push_back(outcome);
    }

    /// Script the next delegate_transaction outcome
    pub fn queue_delegation(&self, outcome: Result<String>) {
        self.state.lock().delegate_queue.push_back(outcome);
    }

    /// Stage the status returned when polling a delegated request
    pub fn set_delegated(&self, status: DelegatedStatus) {
        self.state
            .lock()
            .delegated
            .insert(status.request_id.clone(), status);
    }

    /// Candidate page requests seen so far, as (start, end, page)
    pub fn candidate_calls(&self) -> Vec<(u32, u32, u32)> {
        self.state.lock().candidate_calls.clone()
    }

    /// Serial number batches queried so far
    pub fn serial_batches(&self) -> Vec<Vec<String>> {
        self.state.lock().serial_batches.clone()
    }

    /// Program ids fetched so far
    pub fn program_calls(&self) -> Vec<String> {
        self.state.lock().program_calls.clone()
    }

    /// Transactions broadcast so far
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().broadcasts.clone()
    }

    /// Delegation requests seen so far
    pub fn delegations(&self) -> Vec<DelegationRequest> {
        self.state.lock().delegations.clone()
    }

    /// Execution requests seen so far
    pub fn executions(&self) -> Vec<ExecutionRequest> {
        self.state.lock().executions.clone()
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    async fn get_height(&self, _chain: &str) -> Result<u32> {
        Ok(self.state.lock().height)
    }

    async fn get_program(&self, _chain: &str, program_id: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.program_calls.push(program_id.to_string());
        state
            .programs
            .get(program_id)
            .cloned()
            .ok_or_else(|| Error::Rejected(format!("unknown program {program_id}")))
    }

    async fn get_ownership_candidates(
        &self,
        _chain: &str,
        start: u32,
        end: u32,
        page: u32,
    ) -> Result<Vec<OwnershipCandidate>> {
        let mut state = self.state.lock();
        state.candidate_calls.push((start, end, page));
        Ok(state
            .candidate_pages
            .get(&(start, end))
            .and_then(|pages| pages.get(page as usize))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_records_by_transition(
        &self,
        _chain: &str,
        keys: &[(String, u32)],
    ) -> Result<Vec<RecordInfo>> {
        let state = self.state.lock();
        Ok(keys
            .iter()
            .filter_map(|key| state.records.get(key).cloned())
            .collect())
    }

    async fn get_serial_numbers(
        &self,
        _chain: &str,
        serial_numbers: &[String],
    ) -> Result<Vec<SerialNumberStatus>> {
        let mut state = self.state.lock();
        state.serial_batches.push(serial_numbers.to_vec());
        Ok(serial_numbers
            .iter()
            .map(|serial| {
                state
                    .serial_statuses
                    .get(serial)
                    .cloned()
                    .unwrap_or_else(|| SerialNumberStatus {
                        serial_number: serial.clone(),
                        spent: false,
                        block_height: None,
                        transaction_id: None,
                        transition_id: None,
                        block_timestamp: None,
                    })
            })
            .collect())
    }

    async fn execute_authorization(
        &self,
        _chain: &str,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResponse> {
        let mut state = self.state.lock();
        state.executions.push(request.clone());
        state
            .execute_queue
            .pop_front()
            .unwrap_or_else(|| Err(Error::Sync("no scripted execution outcome".to_string())))
    }

    async fn broadcast_transaction(&self, _chain: &str, transaction: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.broadcasts.push(transaction.to_string());
        state
            .broadcast_queue
            .pop_front()
            .unwrap_or_else(|| Err(Error::Sync("no scripted broadcast outcome".to_string())))
    }

    async fn delegate_transaction(
        &self,
        _chain: &str,
        request: &DelegationRequest,
    ) -> Result<String> {
        let mut state = self.state.lock();
        state.delegations.push(request.clone());
        state
            .delegate_queue
            .pop_front()
            .unwrap_or_else(|| Err(Error::Sync("no scripted delegation outcome".to_string())))
    }

    async fn get_delegated_transaction(
        &self,
        _chain: &str,
        request_id: &str,
    ) -> Result<DelegatedStatus> {
        self.state
            .lock()
            .delegated
            .get(request_id)
            .cloned()
            .ok_or_else(|| Error::Gateway(format!("unknown delegation request {request_id}")))
    }
}
