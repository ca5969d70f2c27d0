use std::{
	collections::{HashMap, VecDeque},
	path::PathBuf,
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::stream::Merge;
use tempfile::TempDir;
use tokio::{
	spawn,
	sync::{broadcast, oneshot},
	time::timeout,
};
use tokio_stream::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::{
	cache::{CacheKey, DiskCache, ThumbnailIndex},
	config::ThumbnailerConfig,
	event::{BatchStats, ThumbnailEvent},
	file::{DeviceId, FileKind, FileReference},
};

use super::{
	pool, BatchId, CacheDirs, Caches, QualityMode, ThumbnailOutcome, ThumbnailRequest,
	ThumbnailResult, THUMBNAIL_CACHE_DIR_NAME,
};

const ONE_SEC: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum ManagerMessage {
	NewBatch {
		batch: BatchId,
		files: Vec<FileReference>,
		quality: QualityMode,
	},
	Pause(BatchId),
	Resume(BatchId),
	Cancel(BatchId),
	Shutdown(oneshot::Sender<()>),
}

/// The subsystem's public entry point: one actor orchestrating batch intake,
/// the index-first bypass, fair dispatch to the worker pool and the sink loop
/// that persists index rows and emits events.
///
/// Must be created inside a multi-threaded tokio runtime. Dropping it tears
/// the whole pipeline down.
pub struct Thumbnailer {
	msgs_tx: chan::Sender<ManagerMessage>,
	reporter: broadcast::Sender<ThumbnailEvent>,
	cancel_token: CancellationToken,
	_cancel_loop: DropGuard,
}

impl Thumbnailer {
	#[must_use]
	pub fn new(config: ThumbnailerConfig) -> Self {
		let (reporter, _) = broadcast::channel(256);
		let (msgs_tx, msgs_rx) = chan::bounded(8);
		let (results_tx, results_rx) = chan::unbounded();

		let cancel_token = CancellationToken::new();

		let caches = Arc::new(build_caches(&config));

		let requests_tx = pool::start(
			config.workers,
			config.extraction_timeout,
			Arc::clone(&caches),
			results_tx,
			cancel_token.child_token(),
		);

		let inner_cancel_token = cancel_token.child_token();
		let inner_reporter = reporter.clone();
		spawn(async move {
			loop {
				if let Err(e) = spawn(manager_loop(
					config.clone(),
					Arc::clone(&caches),
					requests_tx.clone(),
					msgs_rx.clone(),
					results_rx.clone(),
					inner_reporter.clone(),
					inner_cancel_token.child_token(),
				))
				.await
				{
					error!("Thumbnailer manager failed: {e:#?}; restarting the loop...");
				}

				if inner_cancel_token.is_cancelled() {
					break;
				}
			}
		});

		Self {
			msgs_tx,
			reporter,
			cancel_token: cancel_token.clone(),
			_cancel_loop: cancel_token.drop_guard(),
		}
	}

	/// Events come out of here in completion order, not submission order; each
	/// one is self-identifying via its batch id and file reference.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ThumbnailEvent> {
		self.reporter.subscribe()
	}

	/// Enqueues one scan-batch and returns the id tagging all of its events.
	pub async fn new_batch(&self, files: Vec<FileReference>, quality: QualityMode) -> BatchId {
		let batch = Uuid::new_v4();

		if self
			.msgs_tx
			.send(ManagerMessage::NewBatch {
				batch,
				files,
				quality,
			})
			.await
			.is_err()
		{
			error!("Thumbnailer actor is dead: failed to send new batch");
		}

		batch
	}

	/// Halts dequeuing for the batch; requests already at a worker continue.
	pub async fn pause(&self, batch: BatchId) {
		if self.msgs_tx.send(ManagerMessage::Pause(batch)).await.is_err() {
			error!("Thumbnailer actor is dead: failed to send pause");
		}
	}

	pub async fn resume(&self, batch: BatchId) {
		if self
			.msgs_tx
			.send(ManagerMessage::Resume(batch))
			.await
			.is_err()
		{
			error!("Thumbnailer actor is dead: failed to send resume");
		}
	}

	/// Drops the batch's undispatched queue; results still in flight are
	/// discarded on arrival and no further events carry this id.
	pub async fn cancel(&self, batch: BatchId) {
		if self
			.msgs_tx
			.send(ManagerMessage::Cancel(batch))
			.await
			.is_err()
		{
			error!("Thumbnailer actor is dead: failed to send cancel");
		}
	}

	pub async fn shutdown(&self) {
		let (tx, rx) = oneshot::channel();

		if self.msgs_tx.send(ManagerMessage::Shutdown(tx)).await.is_err() {
			warn!("Trying to shutdown a thumbnailer that was already shutdown");
		} else if timeout(ONE_SEC, rx).await.is_err() {
			warn!("Thumbnailer did not acknowledge shutdown in time; cancelling anyway");
		}

		self.cancel_token.cancel();
	}
}

fn build_caches(config: &ThumbnailerConfig) -> Caches {
	let (fdo_normal, fdo_large) = if config.populate_fdo_cache {
		let fdo_base = dirs::cache_dir()
			.unwrap_or_else(|| config.cache_dir.clone())
			.join(THUMBNAIL_CACHE_DIR_NAME);

		(
			DiskCache::new(fdo_base.join("normal")),
			DiskCache::new(fdo_base.join("large")),
		)
	} else {
		(DiskCache::disabled(), DiskCache::disabled())
	};

	Caches {
		app: DiskCache::new(
			config
				.cache_dir
				.join(THUMBNAIL_CACHE_DIR_NAME)
				.join("normal"),
		),
		fdo_normal,
		fdo_large,
		index: ThumbnailIndex::new(&config.data_dir),
	}
}

struct BatchState {
	queue: VecDeque<ThumbnailRequest>,
	in_flight: usize,
	paused: bool,
	cancelled: bool,
	stats: BatchStats,
	// Kept alive so the working directories survive the batch
	_temp_dirs: Option<(TempDir, TempDir)>,
}

#[allow(clippy::too_many_lines)]
async fn manager_loop(
	config: ThumbnailerConfig,
	caches: Arc<Caches>,
	requests_tx: chan::Sender<ThumbnailRequest>,
	msgs_rx: chan::Receiver<ManagerMessage>,
	results_rx: chan::Receiver<ThumbnailResult>,
	reporter: broadcast::Sender<ThumbnailEvent>,
	cancel_token: CancellationToken,
) {
	enum StreamMessage {
		Manager(ManagerMessage),
		Result(ThumbnailResult),
		Stop,
	}

	let cancel = pin!(cancel_token.cancelled());

	let mut msg_stream = pin!((
		msgs_rx.map(StreamMessage::Manager),
		results_rx.map(StreamMessage::Result),
		cancel.into_stream().map(|()| StreamMessage::Stop),
	)
		.merge());

	let mut batches: HashMap<BatchId, BatchState> = HashMap::new();
	let mut batch_order: VecDeque<BatchId> = VecDeque::new();
	let mut in_flight_total: usize = 0;

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Manager(ManagerMessage::NewBatch {
				batch,
				files,
				quality,
			}) => {
				debug!("New thumbnail batch {batch} with {} files", files.len());

				let (state, events) = tokio::task::block_in_place(|| {
					intake_batch(batch, files, quality, &config, &caches)
				});

				for event in events {
					emit(&reporter, event);
				}

				if state.queue.is_empty() {
					emit(
						&reporter,
						ThumbnailEvent::BatchFinished {
							batch,
							stats: state.stats,
						},
					);
				} else {
					batches.insert(batch, state);
					batch_order.push_back(batch);

					dispatch_more(
						&mut batches,
						&batch_order,
						&requests_tx,
						config.workers,
						&mut in_flight_total,
					)
					.await;
				}
			}

			StreamMessage::Manager(ManagerMessage::Pause(batch)) => {
				if let Some(state) = batches.get_mut(&batch) {
					trace!("Pausing thumbnail batch {batch}");
					state.paused = true;
				}
			}

			StreamMessage::Manager(ManagerMessage::Resume(batch)) => {
				if let Some(state) = batches.get_mut(&batch) {
					trace!("Resuming thumbnail batch {batch}");
					state.paused = false;

					dispatch_more(
						&mut batches,
						&batch_order,
						&requests_tx,
						config.workers,
						&mut in_flight_total,
					)
					.await;
				}
			}

			StreamMessage::Manager(ManagerMessage::Cancel(batch)) => {
				if let Some(state) = batches.get_mut(&batch) {
					debug!(
						"Cancelling thumbnail batch {batch} with {} requests still queued",
						state.queue.len()
					);
					state.cancelled = true;
					state.queue.clear();

					if state.in_flight == 0 {
						batches.remove(&batch);
						batch_order.retain(|id| id != &batch);
					}
				}
			}

			StreamMessage::Manager(ManagerMessage::Shutdown(ack)) => {
				debug!("Thumbnailer actor is stopping");
				ack.send(()).ok();
				break;
			}

			StreamMessage::Result(result) => {
				in_flight_total = in_flight_total.saturating_sub(1);

				let batch = result.batch;
				if let Some(state) = batches.get_mut(&batch) {
					state.in_flight = state.in_flight.saturating_sub(1);

					if state.cancelled {
						trace!("Discarding result for cancelled batch {batch}");
					} else {
						sink_result(result, state, &caches, &reporter);
					}

					if state.queue.is_empty() && state.in_flight == 0 {
						batch_order.retain(|id| id != &batch);

						if let Some(state) =
							batches.remove(&batch).filter(|state| !state.cancelled)
						{
							emit(
								&reporter,
								ThumbnailEvent::BatchFinished {
									batch,
									stats: state.stats,
								},
							);
						}
					}
				} else {
					trace!("Discarding result for unknown batch {batch}");
				}

				dispatch_more(
					&mut batches,
					&batch_order,
					&requests_tx,
					config.workers,
					&mut in_flight_total,
				)
				.await;
			}

			StreamMessage::Stop => {
				debug!("Thumbnailer actor is stopping");
				break;
			}
		}
	}
}

/// Classifies each file of a new batch: answered straight from the caches, or
/// queued for extraction. Also establishes the batch's temporary working
/// directories. Runs on a blocking section; returns the events to emit so the
/// async side stays in control of the reporter.
fn intake_batch(
	batch: BatchId,
	files: Vec<FileReference>,
	quality: QualityMode,
	config: &ThumbnailerConfig,
	caches: &Caches,
) -> (BatchState, Vec<ThumbnailEvent>) {
	let mut events = Vec::with_capacity(files.len() + 1);

	let temp_dirs = match (
		tempfile::Builder::new().prefix("lumina-photos-").tempdir(),
		tempfile::Builder::new().prefix("lumina-videos-").tempdir(),
	) {
		(Ok(photos), Ok(videos)) => {
			events.push(ThumbnailEvent::CacheDirs {
				batch,
				dirs: CacheDirs {
					photo_dir: photos.path().to_path_buf(),
					video_dir: videos.path().to_path_buf(),
				},
			});

			Some((photos, videos))
		}
		_ => {
			warn!("Failed to establish temporary cache directories for batch {batch}");
			None
		}
	};

	let mut state = BatchState {
		queue: VecDeque::with_capacity(files.len()),
		in_flight: 0,
		paused: false,
		cancelled: false,
		stats: BatchStats::default(),
		_temp_dirs: temp_dirs,
	};

	for file in files {
		if let Some(row) = caches.index.lookup(&file) {
			if row.failed {
				// Terminal failure remembered from an earlier scan; don't retry
				state.stats.failed += 1;
				events.push(ThumbnailEvent::Thumbnail {
					batch,
					file,
					thumbnail: None,
				});
				continue;
			}

			if let Some(bytes) = caches.app.get(&CacheKey::new(&file), file.mtime, file.size) {
				state.stats.from_cache += 1;
				events.push(ThumbnailEvent::Thumbnail {
					batch,
					file,
					thumbnail: Some(bytes),
				});
				continue;
			}

			trace!(
				"Index row without a matching artifact for {}; regenerating",
				file.path.display()
			);
		}

		let sidecar = resolve_sidecar(&file);
		state.queue.push_back(ThumbnailRequest {
			batch,
			file,
			sidecar,
			quality,
			write_fdo: config.populate_fdo_cache,
		});
	}

	(state, events)
}

/// Writes the index row for one result and forwards it to the caller.
fn sink_result(
	result: ThumbnailResult,
	state: &mut BatchState,
	caches: &Caches,
	reporter: &broadcast::Sender<ThumbnailEvent>,
) {
	let (thumbnail, artifact_name, failed) = match result.outcome {
		ThumbnailOutcome::Generated { png, artifact_name } => (Some(png), artifact_name, false),
		ThumbnailOutcome::Failed => (
			None,
			CacheKey::new(&result.file).artifact_name(),
			true,
		),
	};

	tokio::task::block_in_place(|| {
		caches.index.record(
			&result.file,
			&artifact_name,
			result.orientation_unknown,
			failed,
		);
	});

	if failed {
		state.stats.failed += 1;
	} else {
		state.stats.generated += 1;
	}

	emit(
		reporter,
		ThumbnailEvent::Thumbnail {
			batch: result.batch,
			file: result.file,
			thumbnail,
		},
	);
}

/// Keeps at most one request per worker in flight, so pause and cancel stay
/// responsive while the pool never idles with work available. The cancel and
/// pause flags are checked before every single dispatch.
async fn dispatch_more(
	batches: &mut HashMap<BatchId, BatchState>,
	batch_order: &VecDeque<BatchId>,
	requests_tx: &chan::Sender<ThumbnailRequest>,
	max_in_flight: usize,
	in_flight_total: &mut usize,
) {
	'refill: while *in_flight_total < max_in_flight {
		let mut dispatched = false;

		for batch in batch_order {
			if *in_flight_total >= max_in_flight {
				break 'refill;
			}

			let Some(state) = batches.get_mut(batch) else {
				continue;
			};
			if state.paused || state.cancelled {
				continue;
			}

			if let Some(request) = state.queue.pop_front() {
				state.in_flight += 1;
				*in_flight_total += 1;
				dispatched = true;

				if requests_tx.send(request).await.is_err() {
					error!("Thumbnail worker pool is dead: failed to dispatch request");
				}
			}
		}

		if !dispatched {
			break;
		}
	}
}

/// Camera-written `.THM` files next to a video short-circuit extraction from
/// the video itself, which this subsystem never decodes.
fn resolve_sidecar(file: &FileReference) -> Option<PathBuf> {
	if file.kind != FileKind::Video || file.device != DeviceId::Filesystem {
		return None;
	}

	["THM", "thm"]
		.iter()
		.map(|ext| file.path.with_extension(ext))
		.find(|candidate| candidate.is_file())
}

fn emit(reporter: &broadcast::Sender<ThumbnailEvent>, event: ThumbnailEvent) {
	if reporter.send(event).is_err() {
		trace!("No subscribers on the thumbnailer's event bus");
	}
}
