mod common;

use adlib_sequencer::{
    DriverVersion, RegisterLog, RegisterSink, RegisterWrite, Sequencer, SequencerConfig,
};
use common::{fm_instrument, loaded_sequencer, rel, run_ticks, values_at, SongBuilder};

const KEY_ON: u8 = 0x20;

fn key_writes(writes: &[RegisterWrite], addr: u16) -> Vec<u8> {
    writes
        .iter()
        .filter(|w| w.addr == addr)
        .map(|w| w.value)
        .collect()
}

#[test]
fn single_note_keys_on_once_and_off_once() {
    let blob = SongBuilder::new().program(1, 0, 0, &[0x00, 0x0A]).build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);

    let trace = run_ticks(&sequencer, 12);

    let first = key_writes(&trace[0], 0xB0);
    assert_eq!(first.iter().filter(|v| *v & KEY_ON != 0).count(), 1);
    assert_eq!(first.last(), Some(&0x21));
    assert_eq!(key_writes(&trace[0], 0xA0), vec![0x34]);

    for (tick, writes) in trace.iter().enumerate().take(10).skip(1) {
        assert!(writes.is_empty(), "unexpected writes on tick {}", tick + 1);
    }

    assert_eq!(trace[10], vec![RegisterWrite { addr: 0xB0, value: 0x01 }]);
    assert!(trace[11].is_empty());
    assert!(!sequencer.is_channel_playing(0));

    let key_ons = values_at(&trace, 0xB0)
        .into_iter()
        .filter(|v| v & KEY_ON != 0)
        .count();
    assert_eq!(key_ons, 1);
}

#[test]
fn legacy_note_spacing_releases_one_tick_early() {
    let blob = SongBuilder::new().program(1, 0, 0, &[0x00, 0x0A]).build();
    let config = SequencerConfig {
        default_note_spacing: 1,
        ..SequencerConfig::default()
    };
    let sequencer = Sequencer::with_config(RegisterLog::new(), config);
    sequencer.set_sound_data(blob);
    sequencer.start_song(1);

    let trace = run_ticks(&sequencer, 11);
    assert_eq!(key_writes(&trace[9], 0xB0), vec![0x01]);
    assert_eq!(key_writes(&trace[10], 0xB0), vec![0x01]);
    assert!(trace[8].is_empty());
}

#[test]
fn higher_priority_request_wins_within_one_tick() {
    let blob = SongBuilder::new()
        .program(1, 0, 3, &[0x00, 0x0A])
        .program(2, 0, 5, &[0x05, 0x0A])
        .build();

    let sequencer = loaded_sequencer(blob.clone());
    sequencer.start_song(1);
    sequencer.start_song(2);
    sequencer.tick();
    assert_eq!(sequencer.channel(0).program_id(), Some(2));
    assert_eq!(sequencer.channel(0).priority(), 5);
    assert_eq!(sequencer.preempted_requests(), 0);

    let reversed = loaded_sequencer(blob);
    reversed.start_song(2);
    reversed.start_song(1);
    reversed.tick();
    assert_eq!(reversed.channel(0).program_id(), Some(2));
    assert_eq!(reversed.preempted_requests(), 1);
}

#[test]
fn lower_priority_request_leaves_channel_untouched() {
    let blob = SongBuilder::new()
        .program(1, 0, 10, &[0x00, 0x20])
        .program(2, 0, 5, &[0x07, 0x20])
        .build();

    let reference = loaded_sequencer(blob.clone());
    reference.start_song(1);
    let reference_trace = run_ticks(&reference, 4);

    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let mut trace = run_ticks(&sequencer, 2);
    sequencer.start_song(2);
    trace.extend(run_ticks(&sequencer, 2));

    assert_eq!(trace, reference_trace);
    assert_eq!(sequencer.channel(0), reference.channel(0));
    assert_eq!(sequencer.preempted_requests(), 1);
}

#[test]
fn equal_priority_request_rebinds() {
    let blob = SongBuilder::new()
        .program(1, 0, 10, &[0x00, 0x20])
        .program(2, 0, 10, &[0x07, 0x20])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.tick();
    sequencer.start_song(2);
    sequencer.tick();
    assert_eq!(sequencer.channel(0).program_id(), Some(2));
}

#[test]
fn priority_compares_signed() {
    let blob = SongBuilder::new()
        .program(1, 0, 0x05, &[0x00, 0x20])
        .program(2, 0, 0xF0, &[0x07, 0x20])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.tick();
    sequencer.start_song(2);
    sequencer.tick();
    assert_eq!(sequencer.channel(0).program_id(), Some(1));
    assert_eq!(sequencer.preempted_requests(), 1);
}

#[test]
fn vibrato_swings_and_returns() {
    // setupVibrato tempo 0x56, range 2, 1 step, no delay; note C for 0x20
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x95, 0x56, 0x02, 0x01, 0x00, 0x00, 0x20])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);

    let trace = run_ticks(&sequencer, 6);
    assert_eq!(key_writes(&trace[0], 0xA0), vec![0x34]);
    assert!(trace[1].is_empty());
    assert_eq!(
        trace[2],
        vec![
            RegisterWrite { addr: 0xA0, value: 0x36 },
            RegisterWrite { addr: 0xB0, value: 0x21 },
        ]
    );
    assert!(trace[3].is_empty());
    assert!(trace[4].is_empty());
    assert_eq!(key_writes(&trace[5], 0xA0), vec![0x34]);
    assert_eq!(key_writes(&trace[5], 0xB0), vec![0x21]);
}

#[test]
fn identical_inputs_give_identical_traces() {
    // Random durations and random detune inside a counted loop.
    let mut code = vec![0xBC, 0x07, 0x80, 0x10];
    let loop_start = code.len();
    code.extend_from_slice(&[0x24, 0x04, 0xB5, 0x00, 0x3F, 0x89, 0x02, 0x81]);
    let after = code.len() + 2;
    code.extend_from_slice(&rel(after, loop_start));

    let blob = SongBuilder::new()
        .program(1, 0, 0, &code)
        .program(2, 3, 0, &[0x30, 0x07, 0x32, 0x05])
        .build();

    let run = || {
        let sequencer = loaded_sequencer(blob.clone());
        sequencer.start_song(1);
        sequencer.start_song(2);
        run_ticks(&sequencer, 200)
    };

    let first = run();
    let second = run();
    assert!(first.iter().map(Vec::len).sum::<usize>() > 20);
    assert_eq!(first, second);
}

#[test]
fn extra_level_changes_saturate_total_level() {
    // setupInstrument 0; setRepeat 20; loop { changeExtraLevel1 +0x10; playRest 1 }
    let mut code = vec![0x90, 0x00, 0x80, 0x14];
    let loop_start = code.len();
    code.extend_from_slice(&[0xB0, 0x10, 0x89, 0x01, 0x81]);
    let after = code.len() + 2;
    code.extend_from_slice(&rel(after, loop_start));

    let blob = SongBuilder::new()
        .program(1, 0, 0, &code)
        .instrument(fm_instrument(0x10, 0x50))
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let trace = run_ticks(&sequencer, 50);

    let levels = values_at(&trace, 0x43);
    assert!(levels.len() > 20);
    // Key scale bits survive, total level pins at 0x3F.
    assert!(levels.iter().all(|v| v & 0xC0 == 0x40));
    assert_eq!(levels[0], 0x50);
    assert_eq!(levels.last(), Some(&(0x40 | 0x3F)));
    assert!(levels.windows(2).all(|w| w[0] & 0x3F <= w[1] & 0x3F));
    assert!(!sequencer.is_channel_playing(0));
}

#[test]
fn slide_carries_octaves_and_saturates() {
    // setupSlide tempo 0xFF, step +0x40; note C-3 for 0x7F ticks
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x91, 0xFF, 0x00, 0x40, 0x30, 0x7F])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let trace = run_ticks(&sequencer, 100);

    let high = values_at(&trace, 0xB0);
    let low = values_at(&trace, 0xA0);
    assert_eq!(high.len(), low.len() + 1);

    let blocks: Vec<u8> = high.iter().skip(1).map(|bx| (bx >> 2) & 0x07).collect();
    assert!(blocks.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(blocks.first(), Some(&3));
    assert_eq!(blocks.last(), Some(&7));
    assert!(high.iter().skip(1).all(|bx| bx & KEY_ON != 0));

    let channel = sequencer.channel(0);
    assert_eq!(channel.block(), 7);
    assert_eq!(channel.frequency(), 0x3FF);
}

#[test]
fn subroutine_overflow_is_contained() {
    // call self until the stack is full, then unwind with one return too many
    let mut code = vec![0x85];
    code.extend_from_slice(&rel(3, 0));
    code.extend_from_slice(&[0x86, 0x00]);

    let blob = SongBuilder::new()
        .program(1, 0, 0, &code)
        .program(2, 1, 0, &[0x27, 0x30])
        .build();
    let reference_blob = SongBuilder::new()
        .program(1, 0, 0, &[0x88, 0x00])
        .program(2, 1, 0, &[0x27, 0x30])
        .build();

    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.start_song(2);
    let trace = run_ticks(&sequencer, 3);

    let reference = loaded_sequencer(reference_blob);
    reference.start_song(1);
    reference.start_song(2);
    let reference_trace = run_ticks(&reference, 3);

    assert!(!sequencer.is_channel_playing(0));
    assert_eq!(sequencer.channel(0).call_depth(), 0);
    assert!(sequencer.is_channel_playing(1));
    let (channel, expected) = (sequencer.channel(1), reference.channel(1));
    assert_eq!(channel.priority(), expected.priority());
    assert_eq!(channel.duration(), expected.duration());
    assert_eq!(channel.frequency_registers(), expected.frequency_registers());
    assert_eq!(trace, reference_trace);
}

#[test]
fn return_without_call_stops_channel() {
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x00, 0x02, 0x86, 0x00, 0x00, 0x02])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let trace = run_ticks(&sequencer, 3);
    assert!(!sequencer.is_channel_playing(0));
    assert_eq!(key_writes(&trace[2], 0xB0), vec![0x01]);
}

#[test]
fn nested_subroutines_return_in_order() {
    // 0: call 7; 3: note; 5: stop; 7: call 12; 10: return; 12: note; 14: return
    let mut code = vec![0x85];
    code.extend_from_slice(&rel(3, 7));
    code.extend_from_slice(&[0x00, 0x01, 0x88, 0x00]);
    code.push(0x85);
    code.extend_from_slice(&rel(10, 12));
    code.extend_from_slice(&[0x86, 0x00, 0x05, 0x01, 0x86, 0x00]);

    let blob = SongBuilder::new().program(1, 2, 0, &code).build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);

    run_ticks(&sequencer, 1);
    assert_eq!(sequencer.channel(2).call_depth(), 2);
    let trace = run_ticks(&sequencer, 2);
    assert_eq!(sequencer.channel(2).call_depth(), 0);
    assert!(!sequencer.is_channel_playing(2));
    // F-number low of C after the second note ends
    assert_eq!(values_at(&trace, 0xA2), vec![0x34]);
}

#[test]
fn random_detune_draws_a_fresh_value_each_time() {
    // C-0, then two changeNoteRandomly with mask 0x003F, then a rest
    let blob = SongBuilder::new()
        .program(
            1,
            0,
            0,
            &[0x00, 0x01, 0xB5, 0x00, 0x3F, 0xB5, 0x00, 0x3F, 0x89, 0x10],
        )
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let trace = run_ticks(&sequencer, 2);

    // Draws after the seed: 0x948F, then 0xE4DA.
    let low = values_at(&trace, 0xA0);
    assert_eq!(low, vec![0x34, 0x34 + 0x0F, 0x34 + 0x1A]);
    assert_ne!(low[1], low[2]);
    // Key and block survive the detune.
    assert_eq!(values_at(&trace, 0xB0)[2..4], [0x21, 0x21]);
}

#[test]
fn invalid_jump_stops_channel() {
    let blob = SongBuilder::new()
        .program(1, 4, 0, &[0x84, 0x00, 0x40])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    let trace = run_ticks(&sequencer, 1);
    assert!(!sequencer.is_channel_playing(4));
    assert_eq!(key_writes(&trace[0], 0xB4).last(), Some(&0x00));
}

#[test]
fn tight_loop_is_bounded_per_tick() {
    // jump to itself forever
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x84, 0xFD, 0xFF])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    run_ticks(&sequencer, 3);
    assert!(sequencer.is_channel_playing(0));
    assert_eq!(sequencer.channel(0).duration(), 1);
}

#[test]
fn wait_for_end_of_program_blocks_until_done() {
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x00, 0x05])
        .program(2, 1, 0, &[0x8F, 0x01, 0x30, 0x05])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.start_song(2);
    let trace = run_ticks(&sequencer, 10);

    let key_off_tick = trace
        .iter()
        .position(|w| key_writes(w, 0xB0).contains(&0x01))
        .expect("channel 0 keys off");
    let key_on_tick = trace
        .iter()
        .position(|w| key_writes(w, 0xB1).iter().any(|v| v & KEY_ON != 0))
        .expect("channel 1 keys on");
    assert_eq!(key_off_tick, 5);
    assert_eq!(key_on_tick, key_off_tick + 1);
}

#[test]
fn music_volume_zero_silences_running_voice() {
    let blob = SongBuilder::new()
        .program(1, 0, 0, &[0x90, 0x00, 0x00, 0x40])
        .instrument(fm_instrument(0x05, 0x05))
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.tick();
    sequencer.with_sink(|log| log.clear());

    sequencer.set_music_volume(0);
    sequencer.with_sink(|log| {
        assert_eq!(log.read_register(0x40), 0x3F);
        assert_eq!(log.read_register(0x43), 0x3F);
    });
    assert_eq!(sequencer.channel(0).volume_modifier(), 0);
}

#[test]
fn sfx_volume_scales_velocity_until_next_start() {
    // Velocity byte sits at program offset 3, the first operand.
    let blob = SongBuilder::for_version(DriverVersion::V4)
        .program(1, 7, 0x40, &[0x80, 0x10, 0x00, 0x04])
        .build();
    let config = SequencerConfig::for_version(DriverVersion::V4);
    let sequencer = Sequencer::with_config(RegisterLog::new(), config);
    sequencer.set_sound_data(blob);

    sequencer.start_song_with_volume(1, 0x80);
    sequencer.tick();
    // ((0x40 * 0x80) >> 8)
    assert_eq!(sequencer.channel(7).priority(), 0x20);

    sequencer.stop_all();
    sequencer.start_song(1);
    sequencer.tick();
    assert_eq!(sequencer.channel(7).priority(), 0x40);
}

#[test]
fn rhythm_section_drives_percussion_registers() {
    let blob = SongBuilder::new()
        .program(
            9,
            9,
            0,
            &[
                0xC1, 0x00, 0x01, 0x02, 0x0A, 0x50, 0x09, 0x40, 0x05, 0x30, // setup
                0xC2, 0x11, // strike bass drum and hi-hat
                0xC4, 0x10, 0x05, // bass drum level 2
            ],
        )
        .instrument(fm_instrument(0x01, 0x08))
        .instrument(fm_instrument(0x02, 0x03))
        .instrument(fm_instrument(0x04, 0x06))
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(9);
    let trace = run_ticks(&sequencer, 1);

    assert_eq!(values_at(&trace, 0xB6), vec![0x0A]);
    assert_eq!(values_at(&trace, 0xA6), vec![0x50]);
    assert_eq!(values_at(&trace, 0xB8), vec![0x05]);
    assert_eq!(values_at(&trace, 0xBD), vec![0x20, 0x31]);
    // 5 + 0x08 + 0 + 5
    assert_eq!(values_at(&trace, 0x53), vec![0x08, 0x12]);
    assert!(!sequencer.is_channel_playing(9));

    // Rhythm mode keeps voices 6-8 keyed.
    sequencer.stop_all();
    sequencer.with_sink(|log| {
        assert_eq!(log.writes_to(0xB7).count(), 0);
        assert_eq!(log.writes_to(0xB0).count(), 1);
    });
}

#[test]
fn sound_trigger_is_visible_to_host() {
    let blob = SongBuilder::new()
        .program(1, 9, 0, &[0xC7, 0x2A])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.tick();
    assert_eq!(sequencer.sound_trigger(), 0x2A);
    sequencer.reset_sound_trigger();
    assert_eq!(sequencer.sound_trigger(), 0);
}

#[test]
fn control_channel_starts_other_programs() {
    // setupProgram 2; then stop
    let blob = SongBuilder::new()
        .program(1, 9, 0, &[0x82, 0x02])
        .program(2, 4, 0, &[0x30, 0x10])
        .build();
    let sequencer = loaded_sequencer(blob);
    sequencer.start_song(1);
    sequencer.tick();
    // Channel 4 is bound before the pass reaches it and plays the same tick.
    assert!(!sequencer.is_channel_playing(9));
    assert_eq!(sequencer.channel(4).program_id(), Some(2));
    assert!(sequencer.channel(4).is_key_on());
}

#[test]
fn sync_jump_mask_holds_channels_until_group_arrives() {
    // Channel 0 loops every 2 ticks, channel 1 every 4.
    let short = [0x00, 0x02, 0x84, 0xFB, 0xFF];
    let long = [0x00, 0x04, 0x84, 0xFB, 0xFF];
    let blob = SongBuilder::new()
        .program(1, 0, 0, &short)
        .program(2, 1, 0, &long)
        .build();

    let strikes = |mask: u16| -> (Vec<usize>, Vec<usize>) {
        let sequencer = loaded_sequencer(blob.clone());
        sequencer.set_sync_jump_mask(mask);
        sequencer.start_song(1);
        sequencer.start_song(2);
        let trace = run_ticks(&sequencer, 12);
        let keyed = |addr: u16| -> Vec<usize> {
            trace
                .iter()
                .enumerate()
                .filter(|(_, w)| key_writes(w, addr).iter().any(|v| v & KEY_ON != 0))
                .map(|(tick, _)| tick)
                .collect()
        };
        (keyed(0xB0), keyed(0xB1))
    };

    let (free_short, free_long) = strikes(0);
    assert_eq!(free_short, vec![0, 2, 4, 6, 8, 10]);
    assert_eq!(free_long, vec![0, 4, 8]);

    // After each jump the short loop waits until the long one jumps too.
    let (synced_short, synced_long) = strikes(0b11);
    assert_eq!(synced_short, vec![0, 2, 6, 10]);
    assert_eq!(synced_long, vec![0, 4, 8]);
}
