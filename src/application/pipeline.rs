use super::credit::CreditStage;
use super::debit::{DebitStage, DedupeWindow};
use super::producer::Producer;
use crate::config::{ExceptionPolicy, PipelineConfig};
use crate::domain::balance::Balance;
use crate::domain::ports::{BalanceStoreHandle, EventLogHandle};
use crate::domain::topic::{PAYMENTS_INFLIGHT, RawRecord, Stage, TRANSACTIONS, Topic};
use crate::domain::transaction::{Payment, Transaction, TransactionKey};
use crate::error::{LedgerError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Topics and consumer groups shared by the pipeline and its handle.
#[derive(Clone)]
struct Topology {
    payments: Topic<Payment>,
    transactions: Topic<Transaction>,
    debit_group: String,
    credit_group: String,
}

impl Topology {
    fn new(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            payments: Topic::new(PAYMENTS_INFLIGHT, config.partitions)?,
            transactions: Topic::new(TRANSACTIONS, config.partitions)?,
            debit_group: Stage::Debit.group(&config.application_id),
            credit_group: Stage::Credit.group(&config.application_id),
        })
    }

    /// Total unprocessed records and the end offset of every partition.
    ///
    /// Payments are read before transactions: a debit is appended before its
    /// payment offset is committed, so a drained payments partition implies
    /// its debits are visible to the transactions scan.
    async fn snapshot(&self, log: &EventLogHandle) -> Result<(u64, Vec<u64>)> {
        let mut lag = 0;
        let mut ends = Vec::new();
        let scans = [
            (self.payments.name(), self.payments.partitions(), &self.debit_group),
            (
                self.transactions.name(),
                self.transactions.partitions(),
                &self.credit_group,
            ),
        ];
        for (topic, partitions, group) in scans {
            for partition in 0..partitions {
                let end = log.end_offset(topic, partition).await?;
                let committed = log
                    .committed_offset(group, topic, partition)
                    .await?
                    .unwrap_or(0);
                lag += end.saturating_sub(committed);
                ends.push(end);
            }
        }
        Ok((lag, ends))
    }
}

enum Processor {
    Debit {
        stage: Arc<DebitStage>,
        dedupe: DedupeWindow,
    },
    Credit {
        stage: Arc<CreditStage>,
    },
}

/// Sole consumer of one partition for one stage.
struct PartitionWorker {
    stage: Stage,
    partition: u32,
    topic: String,
    group: String,
    next: u64,
    policy: ExceptionPolicy,
    max_poll: usize,
    halted: bool,
    log: EventLogHandle,
    processor: Processor,
}

impl PartitionWorker {
    async fn handle(&mut self, raw: RawRecord) -> Result<()> {
        match &mut self.processor {
            Processor::Debit { stage, dedupe } => {
                let record = stage.payments().decode(raw)?;
                stage.process(record, dedupe).await?;
            }
            Processor::Credit { stage } => {
                let record = stage.transactions().decode(raw)?;
                stage.process(&record).await?;
            }
        }
        Ok(())
    }

    /// Handles the records available right now, one at a time, committing
    /// the consumer offset after each. Returns how many were handled.
    async fn poll(&mut self) -> Result<usize> {
        let records = self
            .log
            .read(&self.topic, self.partition, self.next, self.max_poll)
            .await?;
        let mut handled = 0;
        for raw in records {
            let offset = raw.offset;
            if let Err(err) = self.handle(raw).await {
                // A committed balance whose credit is missing is never skipped;
                // the offset stays put so recovery re-appends the credit.
                let skip = matches!(self.policy, ExceptionPolicy::LogAndContinue)
                    && !matches!(err, LedgerError::UnconfirmedCredit { .. });
                if !skip {
                    tracing::error!(
                        stage = %self.stage,
                        partition = self.partition,
                        offset,
                        error = %err,
                        "Halting partition"
                    );
                    self.halted = true;
                    return Err(LedgerError::PartitionHalted {
                        stage: self.stage,
                        partition: self.partition,
                        source: Box::new(err),
                    });
                }
                tracing::warn!(
                    stage = %self.stage,
                    partition = self.partition,
                    offset,
                    error = %err,
                    "Skipping record"
                );
            }
            self.log
                .commit_offset(&self.group, &self.topic, self.partition, offset + 1)
                .await?;
            self.next = offset + 1;
            handled += 1;
        }
        Ok(handled)
    }

    /// Consumes until shutdown is signalled. Stops only between records.
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            if self.poll().await? > 0 {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                ready = self.log.wait_for(&self.topic, self.partition, self.next) => ready?,
            }
        }
    }
}

/// The debit and credit/reversal stages wired over one log and one store.
///
/// Every partition of each topic has exactly one worker, so records sharing
/// a key are never handled concurrently and always in log order.
pub struct LedgerPipeline {
    log: EventLogHandle,
    store: BalanceStoreHandle,
    topology: Topology,
    workers: Vec<PartitionWorker>,
}

impl LedgerPipeline {
    /// Builds the workers and runs balance store recovery for every partition.
    pub async fn start(
        config: PipelineConfig,
        log: EventLogHandle,
        store: BalanceStoreHandle,
    ) -> Result<Self> {
        config.validate()?;
        let topology = Topology::new(&config)?;
        let debit = Arc::new(DebitStage::new(
            log.clone(),
            topology.payments.clone(),
            topology.transactions.clone(),
        ));
        let credit = Arc::new(CreditStage::new(
            log.clone(),
            store.clone(),
            topology.transactions.clone(),
            topology.credit_group.clone(),
        ));

        let mut workers = Vec::with_capacity(2 * config.partitions as usize);
        for partition in 0..config.partitions {
            let next = log
                .committed_offset(&topology.debit_group, PAYMENTS_INFLIGHT, partition)
                .await?
                .unwrap_or(0);
            workers.push(PartitionWorker {
                stage: Stage::Debit,
                partition,
                topic: PAYMENTS_INFLIGHT.to_string(),
                group: topology.debit_group.clone(),
                next,
                policy: config.exception_policy,
                max_poll: config.max_poll_records,
                halted: false,
                log: log.clone(),
                processor: Processor::Debit {
                    stage: debit.clone(),
                    dedupe: DedupeWindow::new(config.dedupe),
                },
            });
        }
        for partition in 0..config.partitions {
            let next = credit
                .recover(partition, config.exception_policy, config.max_poll_records)
                .await?;
            workers.push(PartitionWorker {
                stage: Stage::Credit,
                partition,
                topic: TRANSACTIONS.to_string(),
                group: topology.credit_group.clone(),
                next,
                policy: config.exception_policy,
                max_poll: config.max_poll_records,
                halted: false,
                log: log.clone(),
                processor: Processor::Credit {
                    stage: credit.clone(),
                },
            });
        }

        tracing::info!(
            application_id = %config.application_id,
            partitions = config.partitions,
            "Pipeline started"
        );
        Ok(Self {
            log,
            store,
            topology,
            workers,
        })
    }

    pub fn producer(&self) -> Producer {
        Producer::new(
            self.log.clone(),
            self.topology.payments.clone(),
            self.topology.transactions.clone(),
        )
    }

    /// One pass over every live worker. A worker that fails is halted and
    /// skipped by later passes; the others are still polled. Returns the
    /// first halt of the pass, if any.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let mut halted = None;
        let handled = self.pass(&mut halted).await;
        match halted {
            Some(err) => Err(err),
            None => Ok(handled),
        }
    }

    /// Polls until a full pass handles nothing, including the credits the
    /// pipeline feeds back into its own log. Partitions keep draining after
    /// another one halts; the first halt is returned once all are idle.
    pub async fn run_until_idle(&mut self) -> Result<usize> {
        let mut halted = None;
        let mut total = 0;
        loop {
            let handled = self.pass(&mut halted).await;
            if handled == 0 {
                break;
            }
            total += handled;
        }
        match halted {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }

    async fn pass(&mut self, halted: &mut Option<LedgerError>) -> usize {
        let mut handled = 0;
        for worker in self.workers.iter_mut().filter(|w| !w.halted) {
            let before = worker.next;
            if let Err(err) = worker.poll().await {
                worker.halted = true;
                halted.get_or_insert(err);
            }
            // Records handled before a halt still count as progress.
            handled += (worker.next - before) as usize;
        }
        handled
    }

    pub async fn balance(&self, key: &TransactionKey) -> Result<Balance> {
        Ok(self.store.get(key).await?.unwrap_or_default())
    }

    pub async fn balances(&self) -> Result<Vec<(TransactionKey, Balance)>> {
        self.store.all().await
    }

    /// Records on either topic not yet handled by their stage.
    pub async fn lag(&self) -> Result<u64> {
        Ok(self.topology.snapshot(&self.log).await?.0)
    }

    /// Moves every live worker onto its own task.
    pub fn spawn(self) -> PipelineHandle {
        let (shutdown, receiver) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for worker in self.workers.into_iter().filter(|w| !w.halted) {
            let receiver = receiver.clone();
            tasks.spawn(async move {
                let (stage, partition) = (worker.stage, worker.partition);
                (stage, partition, worker.run(receiver).await)
            });
        }
        PipelineHandle {
            log: self.log,
            store: self.store,
            topology: self.topology,
            shutdown,
            tasks,
        }
    }
}

/// A pipeline running on background tasks.
pub struct PipelineHandle {
    log: EventLogHandle,
    store: BalanceStoreHandle,
    topology: Topology,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<(Stage, u32, Result<()>)>,
}

impl PipelineHandle {
    pub fn producer(&self) -> Producer {
        Producer::new(
            self.log.clone(),
            self.topology.payments.clone(),
            self.topology.transactions.clone(),
        )
    }

    pub async fn lag(&self) -> Result<u64> {
        Ok(self.topology.snapshot(&self.log).await?.0)
    }

    pub async fn balances(&self) -> Result<Vec<(TransactionKey, Balance)>> {
        self.store.all().await
    }

    /// Waits until two consecutive scans show no lag and no new appends.
    pub async fn wait_until_idle(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.settle())
            .await
            .map_err(|_| {
                LedgerError::InternalError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "pipeline did not become idle",
                )))
            })?
    }

    async fn settle(&self) -> Result<()> {
        let mut previous: Option<Vec<u64>> = None;
        loop {
            let (lag, ends) = self.topology.snapshot(&self.log).await?;
            if lag == 0 && previous.as_ref() == Some(&ends) {
                return Ok(());
            }
            previous = (lag == 0).then_some(ends);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Signals every worker to stop at its next record boundary and waits.
    ///
    /// Returns the first error a worker stopped with, such as a halted
    /// partition.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok((_, _, Ok(()))) => continue,
                Ok((stage, partition, Err(err))) => {
                    tracing::error!(%stage, partition, error = %err, "Worker stopped with error");
                    err
                }
                Err(join_err) => LedgerError::InternalError(Box::new(join_err)),
            };
            first_error.get_or_insert(outcome);
        }
        tracing::info!("Pipeline stopped");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
