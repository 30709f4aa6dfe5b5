use crate::segment::{pad8, Segment};
use claw_base::ErrorKind;
use test_log::test;

#[test]
fn test_pad8() {
    assert_eq!(pad8(0), 0);
    assert_eq!(pad8(1), 8);
    assert_eq!(pad8(8), 8);
    assert_eq!(pad8(9), 16);
}

#[test]
fn test_insert_shifts_right() {
    let mut seg = Segment::from_vec(vec![1, 2, 3, 4]);
    seg.insert_at(2, &[9, 9]).unwrap();
    assert_eq!(seg.bytes(), &[1, 2, 9, 9, 3, 4]);
    seg.insert_at(6, &[7]).unwrap();
    assert_eq!(seg.bytes(), &[1, 2, 9, 9, 3, 4, 7]);
    seg.insert_at(0, &[0]).unwrap();
    assert_eq!(seg.bytes(), &[0, 1, 2, 9, 9, 3, 4, 7]);
}

#[test]
fn test_remove_shifts_left() {
    let mut seg = Segment::from_vec(vec![1, 2, 3, 4, 5]);
    seg.remove_at(1, 2).unwrap();
    assert_eq!(seg.bytes(), &[1, 4, 5]);
    seg.remove_at(2, 1).unwrap();
    assert_eq!(seg.bytes(), &[1, 4]);
}

#[test]
fn test_replace_grow_shrink_same() {
    let mut seg = Segment::from_vec(vec![1, 2, 3, 4]);
    seg.replace_at(1, 2, &[8, 8, 8]).unwrap();
    assert_eq!(seg.bytes(), &[1, 8, 8, 8, 4]);
    seg.replace_at(1, 3, &[5]).unwrap();
    assert_eq!(seg.bytes(), &[1, 5, 4]);
    seg.replace_at(0, 1, &[6]).unwrap();
    assert_eq!(seg.bytes(), &[6, 5, 4]);
}

#[test]
fn test_bounds_failures() {
    let mut seg = Segment::from_vec(vec![0; 8]);
    assert_eq!(seg.insert_at(9, &[1]).unwrap_err().kind(), ErrorKind::OutOfBounds);
    assert_eq!(seg.remove_at(4, 5).unwrap_err().kind(), ErrorKind::OutOfBounds);
    assert_eq!(
        seg.replace_at(7, 2, &[1]).unwrap_err().kind(),
        ErrorKind::OutOfBounds
    );
    assert_eq!(seg.slice(8, 1).unwrap_err().kind(), ErrorKind::OutOfBounds);
    assert_eq!(seg.read_u32_at(5).unwrap_err().kind(), ErrorKind::OutOfBounds);
}

#[test]
fn test_le_helpers() {
    let mut seg = Segment::from_vec(vec![0; 16]);
    seg.write_u16_at(0, 0xbeef).unwrap();
    seg.write_u32_at(4, 0xdead_beef).unwrap();
    seg.write_u64_at(8, 0x0123_4567_89ab_cdef).unwrap();
    assert_eq!(seg.read_u16_at(0).unwrap(), 0xbeef);
    assert_eq!(seg.read_u32_at(4).unwrap(), 0xdead_beef);
    assert_eq!(seg.read_u64_at(8).unwrap(), 0x0123_4567_89ab_cdef);
    assert_eq!(seg.bytes()[0..2], [0xef, 0xbe]);
}

#[test]
fn test_views_detach_on_write() {
    let parent = Segment::from_vec(vec![1, 2, 3, 4, 5, 6, 7, 8]);
    let mut view = parent.view(2, 4).unwrap();
    assert_eq!(view.bytes(), &[3, 4, 5, 6]);
    view.insert_at(0, &[9]).unwrap();
    assert_eq!(view.bytes(), &[9, 3, 4, 5, 6]);
    // The parent's allocation is untouched by the view's mutation.
    assert_eq!(parent.bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_reset_and_reuse() {
    let mut seg = Segment::from_vec(vec![1, 2, 3]);
    seg.reset();
    assert!(seg.is_empty());
    seg.insert_at(0, &[4, 5]).unwrap();
    assert_eq!(seg.bytes(), &[4, 5]);
    let buf = seg.take_buf();
    assert!(buf.is_empty());
    assert!(seg.is_empty());
}
