use std::{fs, io::Cursor, io::Write, path::Path, time::Duration};

use image::DynamicImage;
use lumina_core::{
	BatchId, BatchStats, CacheDirs, CacheKey, DeviceId, FileKind, FileReference, QualityMode,
	ThumbnailEvent, ThumbnailIndex, Thumbnailer, ThumbnailerConfig,
};
use tokio::{sync::broadcast, time::timeout};

const EVENT_WAIT: Duration = Duration::from_secs(20);

fn config(root: &Path) -> ThumbnailerConfig {
	ThumbnailerConfig::new(root.join("data"), root.join("cache")).with_workers(2)
}

fn write_image(path: &Path, w: u32, h: u32) {
	let mut bytes = Vec::new();
	DynamicImage::new_rgb8(w, h)
		.write_to(
			&mut Cursor::new(&mut bytes),
			image::ImageOutputFormat::Jpeg(90),
		)
		.unwrap();
	fs::write(path, bytes).unwrap();
}

fn jpeg_with_orientation(w: u32, h: u32, orientation: u16) -> Vec<u8> {
	use exif::{experimental::Writer, Field, In, Tag, Value};

	let mut plain = Vec::new();
	DynamicImage::new_rgb8(w, h)
		.write_to(
			&mut Cursor::new(&mut plain),
			image::ImageOutputFormat::Jpeg(90),
		)
		.unwrap();

	let mut writer = Writer::new();
	let field = Field {
		tag: Tag::Orientation,
		ifd_num: In::PRIMARY,
		value: Value::Short(vec![orientation]),
	};
	writer.push_field(&field);

	let mut tiff = Cursor::new(Vec::new());
	writer.write(&mut tiff, false).unwrap();
	let tiff = tiff.into_inner();

	let mut out = vec![0xff, 0xd8, 0xff, 0xe1];
	out.write_all(&u16::try_from(tiff.len() + 8).unwrap().to_be_bytes())
		.unwrap();
	out.extend_from_slice(b"Exif\0\0");
	out.extend_from_slice(&tiff);
	out.extend_from_slice(&plain[2..]);
	out
}

fn file_ref(path: &Path, kind: FileKind) -> FileReference {
	let meta = fs::metadata(path).unwrap();
	let mtime = meta
		.modified()
		.unwrap()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap()
		.as_secs() as i64;

	FileReference {
		path: path.to_path_buf(),
		device: DeviceId::Filesystem,
		size: meta.len(),
		mtime,
		kind,
	}
}

struct BatchOutput {
	cache_dirs: Option<CacheDirs>,
	thumbnails: Vec<(FileReference, Option<Vec<u8>>)>,
	stats: BatchStats,
}

async fn collect_batch(
	rx: &mut broadcast::Receiver<ThumbnailEvent>,
	batch: BatchId,
) -> BatchOutput {
	let mut out = BatchOutput {
		cache_dirs: None,
		thumbnails: Vec::new(),
		stats: BatchStats::default(),
	};

	loop {
		let event = timeout(EVENT_WAIT, rx.recv())
			.await
			.expect("timed out waiting for a thumbnail event")
			.expect("event bus closed");

		match event {
			ThumbnailEvent::CacheDirs { batch: b, dirs } if b == batch => {
				out.cache_dirs = Some(dirs);
			}
			ThumbnailEvent::Thumbnail {
				batch: b,
				file,
				thumbnail,
			} if b == batch => out.thumbnails.push((file, thumbnail)),
			ThumbnailEvent::BatchFinished { batch: b, stats } if b == batch => {
				out.stats = stats;
				return out;
			}
			_ => {}
		}
	}
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_emits_one_event_per_file_plus_finished() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let files = (0..3)
		.map(|i| {
			let path = source.join(format!("IMG_{i:04}.jpg"));
			write_image(&path, 640, 480);
			file_ref(&path, FileKind::Photo)
		})
		.collect::<Vec<_>>();

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let batch = thumbnailer.new_batch(files, QualityMode::High).await;
	let out = collect_batch(&mut rx, batch).await;

	let dirs = out.cache_dirs.expect("cache dirs event");
	assert!(dirs.photo_dir.is_dir());
	assert!(dirs.video_dir.is_dir());

	assert_eq!(out.thumbnails.len(), 3);
	assert!(out.thumbnails.iter().all(|(_, t)| t.is_some()));
	assert_eq!(
		out.stats,
		BatchStats {
			generated: 3,
			from_cache: 0,
			failed: 0,
		}
	);

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_scan_is_served_from_the_caches() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let files = (0..4)
		.map(|i| {
			let path = source.join(format!("IMG_{i:04}.jpg"));
			write_image(&path, 320 + i * 16, 240);
			file_ref(&path, FileKind::Photo)
		})
		.collect::<Vec<_>>();

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let first = thumbnailer.new_batch(files.clone(), QualityMode::High).await;
	let out = collect_batch(&mut rx, first).await;
	assert_eq!(out.stats.generated, 4);

	let second = thumbnailer.new_batch(files, QualityMode::High).await;
	let out = collect_batch(&mut rx, second).await;

	assert_eq!(out.thumbnails.len(), 4);
	assert!(out.thumbnails.iter().all(|(_, t)| t.is_some()));
	assert_eq!(
		out.stats,
		BatchStats {
			generated: 0,
			from_cache: 4,
			failed: 0,
		}
	);

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn terminal_failures_are_remembered_not_retried() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let path = source.join("corrupt.jpg");
	fs::write(&path, b"\xff\xd8 definitely not a jpeg").unwrap();
	let file = file_ref(&path, FileKind::Photo);

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let first = thumbnailer
		.new_batch(vec![file.clone()], QualityMode::High)
		.await;
	let out = collect_batch(&mut rx, first).await;
	assert_eq!(out.thumbnails.len(), 1);
	assert!(out.thumbnails[0].1.is_none());
	assert_eq!(out.stats.failed, 1);

	// The failure row makes the second scan skip extraction entirely
	let second = thumbnailer.new_batch(vec![file], QualityMode::High).await;
	let out = collect_batch(&mut rx, second).await;
	assert!(out.thumbnails[0].1.is_none());
	assert_eq!(
		out.stats,
		BatchStats {
			generated: 0,
			from_cache: 0,
			failed: 1,
		}
	);

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_file_is_regenerated_not_served_stale() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let path = source.join("IMG_0001.jpg");
	write_image(&path, 640, 480);
	let original = file_ref(&path, FileKind::Photo);

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let first = thumbnailer
		.new_batch(vec![original], QualityMode::High)
		.await;
	assert_eq!(collect_batch(&mut rx, first).await.stats.generated, 1);

	// Same path, different content: size changes, so the key triple changes
	write_image(&path, 800, 600);
	let changed = file_ref(&path, FileKind::Photo);

	let second = thumbnailer.new_batch(vec![changed], QualityMode::High).await;
	let out = collect_batch(&mut rx, second).await;
	assert_eq!(
		out.stats,
		BatchStats {
			generated: 1,
			from_cache: 0,
			failed: 0,
		}
	);

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_extractions_fail_but_the_batch_still_finishes() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	// Big enough that decoding reliably outlives a 1ms deadline
	let files = (0..3)
		.map(|i| {
			let path = source.join(format!("IMG_{i:04}.jpg"));
			write_image(&path, 2400, 1800);
			file_ref(&path, FileKind::Photo)
		})
		.collect::<Vec<_>>();

	let thumbnailer = Thumbnailer::new(
		config(root.path()).with_extraction_timeout(Duration::from_millis(1)),
	);
	let mut rx = thumbnailer.subscribe();

	let batch = thumbnailer.new_batch(files, QualityMode::High).await;
	let out = collect_batch(&mut rx, batch).await;

	// Every elapsed request is accounted for as failed; none goes missing
	assert_eq!(out.thumbnails.len(), 3);
	assert!(out.thumbnails.iter().all(|(_, t)| t.is_none()));
	assert_eq!(
		out.stats,
		BatchStats {
			generated: 0,
			from_cache: 0,
			failed: 3,
		}
	);

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_batch_goes_quiet_and_never_finishes() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let files = (0..40)
		.map(|i| {
			let path = source.join(format!("IMG_{i:04}.jpg"));
			write_image(&path, 640, 480);
			file_ref(&path, FileKind::Photo)
		})
		.collect::<Vec<_>>();

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let doomed = thumbnailer.new_batch(files, QualityMode::High).await;
	thumbnailer.cancel(doomed).await;

	// A follow-up batch still runs to completion on the shared pool
	let path = source.join("survivor.jpg");
	write_image(&path, 320, 240);
	let survivor = thumbnailer
		.new_batch(vec![file_ref(&path, FileKind::Photo)], QualityMode::High)
		.await;

	let mut doomed_thumbnails = 0;
	let survivor_stats = loop {
		let event = timeout(EVENT_WAIT, rx.recv())
			.await
			.expect("timed out waiting for a thumbnail event")
			.expect("event bus closed");

		match event {
			ThumbnailEvent::Thumbnail { batch, .. } if batch == doomed => {
				doomed_thumbnails += 1;
			}
			ThumbnailEvent::BatchFinished { batch, .. } if batch == doomed => {
				panic!("cancelled batch must not emit a finished event");
			}
			ThumbnailEvent::BatchFinished { batch, stats } if batch == survivor => break stats,
			_ => {}
		}
	};

	assert_eq!(survivor_stats.generated, 1);
	// Only requests already at a worker before the cancel landed may have
	// produced events; the undispatched queue was dropped wholesale
	assert!(doomed_thumbnails < 40);

	// Quiet period: nothing further arrives for the cancelled batch
	while let Ok(event) = timeout(Duration::from_millis(300), rx.recv()).await {
		let event = event.expect("event bus closed");
		if let ThumbnailEvent::BatchFinished { batch, .. } = event {
			assert_ne!(batch, doomed);
		}
	}

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_batch_finishes_immediately() {
	let root = tempfile::tempdir().unwrap();

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let batch = thumbnailer.new_batch(Vec::new(), QualityMode::Fast).await;
	let out = collect_batch(&mut rx, batch).await;

	assert!(out.cache_dirs.is_some());
	assert!(out.thumbnails.is_empty());
	assert_eq!(out.stats, BatchStats::default());

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn video_thumbnails_come_from_the_sidecar() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let video = source.join("clip.mov");
	fs::write(&video, b"opaque video container").unwrap();
	let sidecar = source.join("clip.THM");
	let mut bytes = Vec::new();
	DynamicImage::new_rgb8(160, 120)
		.write_to(
			&mut Cursor::new(&mut bytes),
			image::ImageOutputFormat::Jpeg(90),
		)
		.unwrap();
	fs::write(&sidecar, bytes).unwrap();

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let batch = thumbnailer
		.new_batch(vec![file_ref(&video, FileKind::Video)], QualityMode::High)
		.await;
	let out = collect_batch(&mut rx, batch).await;

	let png = out.thumbnails[0].1.as_ref().expect("sidecar thumbnail");
	let decoded = image::load_from_memory(png).unwrap();
	// 15px letterbox bands cropped top and bottom
	assert_eq!(image::GenericImageView::dimensions(&decoded), (160, 90));

	thumbnailer.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn oriented_jpeg_is_rotated_and_indexed() {
	let root = tempfile::tempdir().unwrap();
	let source = root.path().join("source");
	fs::create_dir_all(&source).unwrap();

	let path = source.join("rotated.jpg");
	fs::write(&path, jpeg_with_orientation(640, 480, 6)).unwrap();
	let file = file_ref(&path, FileKind::Photo);

	let thumbnailer = Thumbnailer::new(config(root.path()));
	let mut rx = thumbnailer.subscribe();

	let batch = thumbnailer
		.new_batch(vec![file.clone()], QualityMode::High)
		.await;
	let out = collect_batch(&mut rx, batch).await;

	let png = out.thumbnails[0].1.as_ref().expect("rotated thumbnail");
	let decoded = image::load_from_memory(png).unwrap();
	assert_eq!(image::GenericImageView::dimensions(&decoded), (120, 160));

	// The index row is queryable through a fresh handle on the same store
	let index = ThumbnailIndex::new(&root.path().join("data"));
	let row = index.lookup(&file).expect("index row for the scanned file");
	assert_eq!(row.artifact_name, CacheKey::new(&file).artifact_name());
	assert!(!row.orientation_unknown);
	assert!(!row.failed);

	thumbnailer.shutdown().await;
}
