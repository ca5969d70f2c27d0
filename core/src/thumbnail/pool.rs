use std::{collections::VecDeque, pin::pin, sync::Arc, time::Duration};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::{future::Race, stream::Merge};
use image::imageops::FilterType;
use tokio::{spawn, time::timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::cache::{encode_artifact, ArtifactMeta, CacheKey};

use super::{
	extract, Caches, ThumbnailOutcome, ThumbnailRequest, ThumbnailResult, ThumbnailerError,
	FDO_NORMAL_MAX_PX,
};

pub(super) type WorkerId = usize;

/// Pairs pending requests with idle workers, oldest first on both sides, so no
/// worker starves while another is repeatedly assigned work. Pure state
/// transitions; the channel plumbing lives in [`balancer_loop`].
#[derive(Debug, Default)]
pub(super) struct Balancer {
	ready: VecDeque<WorkerId>,
	pending: VecDeque<ThumbnailRequest>,
}

impl Balancer {
	/// A worker finished (or just started) and is idle again.
	pub fn worker_ready(&mut self, id: WorkerId) -> Option<(WorkerId, ThumbnailRequest)> {
		if let Some(request) = self.pending.pop_front() {
			Some((id, request))
		} else {
			self.ready.push_back(id);
			None
		}
	}

	/// A new request arrived; buffered when every worker is busy.
	pub fn push_request(
		&mut self,
		request: ThumbnailRequest,
	) -> Option<(WorkerId, ThumbnailRequest)> {
		if let Some(id) = self.ready.pop_front() {
			Some((id, request))
		} else {
			self.pending.push_back(request);
			None
		}
	}
}

/// Starts the balancer and its workers; the returned sender is the pool's
/// only inbound surface. Results go to `results_tx`, one per request, always,
/// even for extractions that hang or panic.
pub(super) fn start(
	workers: usize,
	extraction_timeout: Duration,
	caches: Arc<Caches>,
	results_tx: chan::Sender<ThumbnailResult>,
	cancel_token: CancellationToken,
) -> chan::Sender<ThumbnailRequest> {
	let workers = workers.max(1);

	let (requests_tx, requests_rx) = chan::unbounded();
	let (ready_tx, ready_rx) = chan::bounded(workers);

	let mailboxes = (0..workers)
		.map(|worker_id| {
			let (mailbox_tx, mailbox_rx) = chan::bounded(1);

			spawn({
				let ready_tx = ready_tx.clone();
				let results_tx = results_tx.clone();
				let caches = Arc::clone(&caches);
				let cancel_token = cancel_token.clone();

				async move {
					loop {
						if let Err(e) = spawn(worker(
							worker_id,
							mailbox_rx.clone(),
							ready_tx.clone(),
							results_tx.clone(),
							Arc::clone(&caches),
							extraction_timeout,
							cancel_token.clone(),
						))
						.await
						{
							error!("Thumbnail worker {worker_id} failed: {e:#?}; restarting...");
						}

						if cancel_token.is_cancelled() {
							break;
						}
					}
				}
			});

			mailbox_tx
		})
		.collect::<Vec<_>>();

	spawn(balancer_loop(requests_rx, ready_rx, mailboxes, cancel_token));

	requests_tx
}

async fn balancer_loop(
	requests_rx: chan::Receiver<ThumbnailRequest>,
	ready_rx: chan::Receiver<WorkerId>,
	mailboxes: Vec<chan::Sender<ThumbnailRequest>>,
	cancel_token: CancellationToken,
) {
	enum StreamMessage {
		NewRequest(ThumbnailRequest),
		WorkerReady(WorkerId),
		Stop,
	}

	let cancel = pin!(cancel_token.cancelled());

	let mut msg_stream = pin!((
		requests_rx.map(StreamMessage::NewRequest),
		ready_rx.map(StreamMessage::WorkerReady),
		cancel.into_stream().map(|()| StreamMessage::Stop),
	)
		.merge());

	let mut balancer = Balancer::default();

	while let Some(msg) = msg_stream.next().await {
		let dispatch = match msg {
			StreamMessage::NewRequest(request) => balancer.push_request(request),
			StreamMessage::WorkerReady(worker_id) => balancer.worker_ready(worker_id),
			StreamMessage::Stop => {
				debug!("Thumbnail load balancer is stopping");
				break;
			}
		};

		if let Some((worker_id, request)) = dispatch {
			if mailboxes[worker_id].send(request).await.is_err() {
				error!("Thumbnail worker {worker_id} is dead: failed to deliver request");
			}
		}
	}
}

async fn worker(
	worker_id: WorkerId,
	mailbox_rx: chan::Receiver<ThumbnailRequest>,
	ready_tx: chan::Sender<WorkerId>,
	results_tx: chan::Sender<ThumbnailResult>,
	caches: Arc<Caches>,
	extraction_timeout: Duration,
	cancel_token: CancellationToken,
) {
	enum RaceOutput {
		Request(Result<ThumbnailRequest, chan::RecvError>),
		Stop,
	}

	loop {
		if ready_tx.send(worker_id).await.is_err() {
			break;
		}

		let msg = (
			async { RaceOutput::Request(mailbox_rx.recv().await) },
			async {
				cancel_token.cancelled().await;
				RaceOutput::Stop
			},
		)
			.race()
			.await;

		let RaceOutput::Request(Ok(request)) = msg else {
			trace!("Thumbnail worker {worker_id} is stopping");
			break;
		};

		let batch = request.batch;
		let file = request.file.clone();
		let path = request.file.path.clone();

		// A hung or panicking extraction still has to account for its request,
		// otherwise the batch completion count comes up short
		let mut handle = spawn(generate_thumbnail(request, Arc::clone(&caches)));

		let result = match timeout(extraction_timeout, &mut handle).await {
			Ok(Ok(result)) => result,
			Ok(Err(e)) => {
				error!("Thumbnail extraction task failed: {e:#?}");
				ThumbnailResult {
					batch,
					file,
					outcome: ThumbnailOutcome::Failed,
					orientation_unknown: true,
				}
			}
			Err(_) => {
				handle.abort();
				warn!(
					"{}",
					ThumbnailerError::TimedOut(path.into_boxed_path())
				);
				ThumbnailResult {
					batch,
					file,
					outcome: ThumbnailOutcome::Failed,
					orientation_unknown: true,
				}
			}
		};

		if results_tx.send(result).await.is_err() {
			break;
		}
	}
}

async fn generate_thumbnail(request: ThumbnailRequest, caches: Arc<Caches>) -> ThumbnailResult {
	trace!("Generating thumbnail for {}", request.file.path.display());

	let extraction = tokio::task::block_in_place(|| extract::extract(&request));

	let outcome = match extraction.image {
		Some(image) => {
			let key = CacheKey::new(&request.file);
			let meta = ArtifactMeta {
				uri: request.file.uri(),
				mtime: request.file.mtime,
				size: request.file.size,
			};

			match encode_artifact(&image, &meta) {
				Ok(png) => {
					tokio::task::block_in_place(|| {
						// The event still carries the bytes even when the
						// tier could not persist them
						let _stored = caches.app.put_bytes(&key, &png);

						if request.write_fdo {
							// Our thumbnails exceed the normal tier's 128px bound
							let normal = image.resize(
								FDO_NORMAL_MAX_PX,
								FDO_NORMAL_MAX_PX,
								FilterType::Triangle,
							);
							caches.fdo_normal.put(&key, &normal, &meta);
							caches.fdo_large.put(&key, &image, &meta);
						}
					});

					ThumbnailOutcome::Generated {
						png,
						artifact_name: key.artifact_name(),
					}
				}
				Err(e) => {
					error!("{}", ThumbnailerError::PngEncoding(e));
					ThumbnailOutcome::Failed
				}
			}
		}
		None => ThumbnailOutcome::Failed,
	};

	trace!("Finished thumbnail attempt for {}", request.file.path.display());

	ThumbnailResult {
		batch: request.batch,
		file: request.file,
		outcome,
		orientation_unknown: extraction.orientation_unknown,
	}
}
