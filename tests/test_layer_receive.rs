//! End-to-end push, dedup, and delete tests against the in-memory store.

use std::io::Write;

use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use tar::{Archive, Builder, EntryType, Header};
use tarsink::{Digest, LayerReceiver, MemoryBlobStore, SourceLayer, TarsinkError};

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

fn regular_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(1_700_000_000);
    header
}

fn dir_header() -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(1_700_000_000);
    header
}

/// Builds a tar from (path, payload) rows; a trailing `/` in the path makes a directory.
fn build_tar(rows: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (path, payload) in rows {
        if path.ends_with('/') {
            let mut header = dir_header();
            builder
                .append_data(&mut header, path, std::io::empty())
                .unwrap();
        } else {
            let mut header = regular_header(payload.len() as u64);
            builder.append_data(&mut header, path, *payload).unwrap();
        }
    }
    builder.into_inner().unwrap()
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn source_layer(bytes: Vec<u8>) -> SourceLayer {
    SourceLayer::new(Digest::compute(&bytes), bytes)
}

fn receiver() -> (LayerReceiver<MemoryBlobStore>, MemoryBlobStore) {
    let store = MemoryBlobStore::new();
    (LayerReceiver::new(store.clone()), store)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_push_translates_whiteouts_and_serves_layer() -> anyhow::Result<()> {
    let (receiver, _) = receiver();

    let input = build_tar(&[
        ("etc/", b""),
        ("etc/app.conf", b"X=1"),
        (".wh.foo.txt", b""),
    ]);
    let manifest = receiver
        .receive_image(vec![source_layer(input)])
        .await?;
    assert_eq!(manifest.len(), 1);

    let stored = receiver.get_layer(&manifest[0]).await?;
    let mut archive = Archive::new(stored.as_ref());
    let entries: Vec<_> = archive.entries()?.collect::<std::io::Result<Vec<_>>>()?;

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].path_bytes().as_ref(), b"etc/");
    assert_eq!(entries[1].path_bytes().as_ref(), b"etc/app.conf");
    // the AUFS marker came out as an OverlayFS 0/0 character device
    assert_eq!(entries[2].path_bytes().as_ref(), b"foo.txt");
    assert_eq!(entries[2].header().entry_type(), EntryType::Char);
    assert_eq!(entries[2].header().device_major()?, Some(0));
    assert_eq!(entries[2].header().device_minor()?, Some(0));
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_repeat_push_is_deduplicated() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let input = build_tar(&[("app/", b""), ("app/run.sh", b"#!/bin/sh\n")]);
    let layer = source_layer(input);

    let first = receiver.receive_image(vec![layer.clone()]).await?;
    let second = receiver.receive_image(vec![layer]).await?;

    assert_eq!(first, second);
    assert_eq!(store.block_count().await, 1);
    assert_eq!(receiver.tracker().count(&first[0]).await, 2);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_identical_layers_dedup_across_images() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let shared = build_tar(&[("base/", b""), ("base/os-release", b"ID=demo\n")]);
    let only_a = build_tar(&[("a.txt", b"image a")]);
    let only_b = build_tar(&[("b.txt", b"image b")]);

    let manifest_a = receiver
        .receive_image(vec![source_layer(shared.clone()), source_layer(only_a)])
        .await?;
    let manifest_b = receiver
        .receive_image(vec![source_layer(shared), source_layer(only_b)])
        .await?;

    // the shared layer is one physical blob with two references
    assert_eq!(manifest_a[0], manifest_b[0]);
    assert_ne!(manifest_a[1], manifest_b[1]);
    assert_eq!(store.block_count().await, 3);
    assert_eq!(receiver.tracker().count(&manifest_a[0]).await, 2);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_delete_collects_only_unshared_layers() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let shared = build_tar(&[("base/", b""), ("base/os-release", b"ID=demo\n")]);
    let only_a = build_tar(&[("a.txt", b"image a")]);
    let only_b = build_tar(&[("b.txt", b"image b")]);

    let manifest_a = receiver
        .receive_image(vec![source_layer(shared.clone()), source_layer(only_a)])
        .await?;
    let manifest_b = receiver
        .receive_image(vec![source_layer(shared), source_layer(only_b)])
        .await?;

    receiver.delete_image(&manifest_a).await?;

    // image A's private layer is gone; the shared layer and B's survive
    assert!(!receiver.layer_exists(&manifest_a[1]).await);
    assert!(receiver.layer_exists(&manifest_b[0]).await);
    assert!(receiver.layer_exists(&manifest_b[1]).await);
    assert_eq!(store.block_count().await, 2);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_push_after_full_delete_restores_layer() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let input = build_tar(&[("data.txt", b"payload")]);
    let layer = source_layer(input);

    let first = receiver.receive_image(vec![layer.clone()]).await?;
    let second = receiver.receive_image(vec![layer.clone()]).await?;
    receiver.delete_image(&first).await?;
    receiver.delete_image(&second).await?;
    assert!(store.is_empty().await);

    // a stale dedup entry must not short-circuit to a dead blob
    let third = receiver.receive_image(vec![layer]).await?;
    assert_eq!(third, first);
    assert!(receiver.layer_exists(&third[0]).await);
    assert_eq!(receiver.tracker().count(&third[0]).await, 1);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_opaque_directory_round_trip() -> anyhow::Result<()> {
    let (receiver, _) = receiver();

    let input = build_tar(&[
        ("conf/", b""),
        ("conf/.wh..wh..opq", b""),
        ("conf/fresh.toml", b"[new]\n"),
    ]);
    let manifest = receiver
        .receive_image(vec![source_layer(input)])
        .await?;

    let stored = receiver.get_layer(&manifest[0]).await?;
    let mut archive = Archive::new(stored.as_ref());
    let mut entries = archive.entries()?;

    let mut dir = entries.next().unwrap()?;
    assert_eq!(dir.path_bytes().as_ref(), b"conf/");
    let extensions: Vec<_> = dir
        .pax_extensions()?
        .expect("opaque directory should carry pax records")
        .collect::<std::io::Result<_>>()?;
    assert!(extensions.iter().any(|ext| {
        ext.key() == Ok("SCHILY.xattr.trusted.overlay.opaque") && ext.value_bytes() == b"y"
    }));

    let file = entries.next().unwrap()?;
    assert_eq!(file.path_bytes().as_ref(), b"conf/fresh.toml");
    assert!(entries.next().is_none());
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_payload_bytes_are_preserved_exactly() -> anyhow::Result<()> {
    let (receiver, _) = receiver();

    let content = b"PATH=/usr/bin\tTERM=xterm\x00\xfftrailer";
    let input = build_tar(&[("env", content)]);
    let manifest = receiver
        .receive_image(vec![source_layer(input)])
        .await?;

    let stored = receiver.get_layer(&manifest[0]).await?;
    let mut archive = Archive::new(stored.as_ref());
    let mut entry = archive.entries()?.next().unwrap()?;
    let mut payload = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut payload)?;

    assert_eq!(payload, content.to_vec());
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_gzip_input_stores_same_digest_as_plain() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let plain = build_tar(&[("same.txt", b"identical content")]);
    let compressed = gzip(&plain);

    let from_plain = receiver
        .receive_layer(&Digest::compute(&plain), Bytes::from(plain))
        .await?;
    let from_gzip = receiver
        .receive_layer(&Digest::compute(&compressed), Bytes::from(compressed))
        .await?;

    // compression does not change the canonical output
    assert_eq!(from_plain, from_gzip);
    assert_eq!(store.block_count().await, 1);
    assert_eq!(receiver.tracker().count(&from_plain).await, 2);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_concurrent_pushes_of_one_layer() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let input = build_tar(&[("hot.txt", b"pushed by everyone")]);
    let layer = source_layer(input);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let receiver = receiver.clone();
            let layer = layer.clone();
            tokio::spawn(async move { receiver.receive_image(vec![layer]).await })
        })
        .collect();

    let mut digests = Vec::new();
    for result in futures::future::join_all(tasks).await {
        digests.push(result??[0]);
    }

    assert!(digests.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(store.block_count().await, 1);
    assert_eq!(receiver.tracker().count(&digests[0]).await, 8);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_corrupt_layer_is_rejected_without_side_effects() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let garbage = b"not a tar archive at all".to_vec();
    let result = receiver
        .receive_image(vec![source_layer(garbage)])
        .await;

    assert!(matches!(result, Err(TarsinkError::CorruptArchive(_))));
    assert!(store.is_empty().await);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_push_rolls_back_earlier_layers() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let good = build_tar(&[("ok.txt", b"fine")]);
    let truncated = {
        let full = build_tar(&[("big.bin", &[9u8; 4096])]);
        full[..600].to_vec()
    };

    let result = receiver
        .receive_image(vec![source_layer(good), source_layer(truncated)])
        .await;

    assert!(result.is_err());
    // the good layer's reference was released and its blob collected
    assert!(store.is_empty().await);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_deleting_more_references_than_held_fails() -> anyhow::Result<()> {
    let (receiver, _) = receiver();

    let input = build_tar(&[("once.txt", b"single reference")]);
    let manifest = receiver
        .receive_image(vec![source_layer(input)])
        .await?;

    receiver.delete_image(&manifest).await?;
    let result = receiver.delete_image(&manifest).await;

    assert!(matches!(result, Err(TarsinkError::RefUnderflow { .. })));
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_manifest_listing_a_digest_twice_holds_two_references() -> anyhow::Result<()> {
    let (receiver, store) = receiver();

    let input = build_tar(&[("twice.txt", b"listed twice")]);
    let layer = source_layer(input);
    let manifest = receiver
        .receive_image(vec![layer.clone(), layer])
        .await?;

    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest[0], manifest[1]);
    assert_eq!(receiver.tracker().count(&manifest[0]).await, 2);

    // one delete of the manifest releases both occurrences
    receiver.delete_image(&manifest).await?;
    assert!(store.is_empty().await);
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_get_layer_for_unknown_digest() -> anyhow::Result<()> {
    let (receiver, _) = receiver();

    let missing = Digest::compute(b"never pushed");
    assert!(!receiver.layer_exists(&missing).await);
    assert!(matches!(
        receiver.get_layer(&missing).await,
        Err(TarsinkError::NotFound(_))
    ));
    anyhow::Ok(())
}

#[test_log::test(tokio::test)]
async fn test_unknown_dialect_is_rejected() -> anyhow::Result<()> {
    let result = LayerReceiver::with_dialects(MemoryBlobStore::new(), "aufs", "btrfs");
    assert!(matches!(
        result,
        Err(TarsinkError::UnsupportedWhiteoutDialect(_))
    ));
    anyhow::Ok(())
}
