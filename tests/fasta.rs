use kira_proteogenomics::fasta::{
    FastaRecord, format_fasta, merge_dedup, parse_fasta, read_fasta, split_stop_codons,
    write_fasta,
};

fn records(text: &str) -> Vec<FastaRecord> {
    parse_fasta(text).unwrap()
}

#[test]
fn merge_keeps_first_occurrence_in_sample_order() {
    let first = records(">p1 s=A\nMKV\n>p2\nAAA\n");
    let second = records(">p2\nAAA\n>p3\nCCC\n>p1 s=A\nMKV\n");

    let merged = merge_dedup([first, second]);
    let ids = merged.iter().map(FastaRecord::id).collect::<Vec<_>>();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);
}

#[test]
fn merge_is_idempotent() {
    let input = records(">a\nMK\n>b\nMK\n>a\nMK\n>a\nMR\n");
    let once = merge_dedup([input.clone()]);
    let twice = merge_dedup([once.clone()]);
    assert_eq!(once, twice);
    assert_eq!(merge_dedup([once.clone(), once.clone()]), once);
}

#[test]
fn same_id_with_different_sequence_is_kept_twice() {
    let merged = merge_dedup([records(">a\nMK\n"), records(">a\nMR\n")]);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].sequence, "MK");
    assert_eq!(merged[1].sequence, "MR");
}

#[test]
fn multi_line_sequences_are_joined() {
    let parsed = records(">x desc here\nMKV\nLLE\n\n>y\nA\n");
    assert_eq!(parsed[0].sequence, "MKVLLE");
    assert_eq!(parsed[0].id(), "x");
    assert_eq!(format_fasta(&parsed), ">x desc here\nMKVLLE\n>y\nA\n");
}

#[test]
fn stop_split_fragments() {
    let split = split_stop_codons(&records(">t1 frame=2\nAK*RR*\n>t2\nMK*\n>t3\n**\n>t4\nPEP\n"));
    let headers = split
        .iter()
        .map(|record| (record.header.as_str(), record.sequence.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        headers,
        vec![
            ("t1_1 frame=2", "AK"),
            ("t1_2 frame=2", "RR"),
            ("t2", "MK"),
            ("t4", "PEP"),
        ]
    );
}

#[test]
fn write_then_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("nested/out.fa")).unwrap();
    let input = records(">a\nMK\n");
    write_fasta(&path, &input).unwrap();
    assert_eq!(read_fasta(&path).unwrap(), input);
}
