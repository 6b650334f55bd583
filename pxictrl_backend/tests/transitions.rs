use maplit::{convert_args, hashmap};
use ndarray::{array, Array2};
use std::collections::HashMap;

use pxicompiler_backend::*;
use pxictrl_backend::*;

const AO: &str = "PXI1Slot3";
const DO: &str = "PXI1Slot6";
const AO_CLOCK: &str = "/PXI1Slot3/PFI0";
const DO_CLOCK: &str = "/PXI1Slot6/PFI4";

fn sim() -> SimDriver {
    SimDriver::new(DriverVersion::new(20, 1, 0))
}

fn analog_worker(sim: &SimDriver, num_ao: usize) -> TaskController<SimDriver, AnalogBoard> {
    let board = AnalogBoard::new("ao_board", AO, num_ao, (-10.0, 10.0)).unwrap();
    TaskController::new(sim.clone(), board)
}

fn digital_worker(sim: &SimDriver) -> TaskController<SimDriver, DigitalBoard> {
    TaskController::new(sim.clone(), DigitalBoard::pxie_6535("do_board", DO).unwrap())
}

fn analog_shot(table: Option<Array2<f64>>) -> Shot {
    let mut exp = Experiment::new();
    exp.add_ao_device("ao_board", AO, AO_CLOCK).unwrap();
    let columns = table.as_ref().map_or(2, |t| t.ncols());
    for id in 0..columns {
        exp.add_ao_channel("ao_board", id).unwrap();
    }
    if let Some(table) = table {
        exp.set_analog_table("ao_board", table).unwrap();
    }
    exp.compile().unwrap()
}

/// Digital lines `port0/line0`, `port0/line1` and `port3/line7`.
fn digital_shot(lines: Array2<u8>) -> Shot {
    let mut exp = Experiment::new();
    exp.add_do_device("do_board", DO, DO_CLOCK).unwrap();
    exp.add_do_channel("do_board", 0, 0).unwrap();
    exp.add_do_channel("do_board", 0, 1).unwrap();
    exp.add_do_channel("do_board", 3, 7).unwrap();
    exp.set_digital_table("do_board", lines).unwrap();
    exp.compile().unwrap()
}

fn analog_values(ao0: f64, ao1: f64) -> FrontPanelValues {
    convert_args!(keys = String::from, hashmap!("ao0" => ao0, "ao1" => ao1))
}

fn digital_values(high: &[&str]) -> FrontPanelValues {
    Model::Pxie6535
        .channel_names()
        .into_iter()
        .map(|name| {
            let value = if high.contains(&name.as_str()) { 1.0 } else { 0.0 };
            (name, value)
        })
        .collect()
}

#[test]
fn odd_analog_counts_fail_before_any_task() {
    for n in 1..=8 {
        let sim = sim();
        match AnalogBoard::new("ao_board", AO, n, (-10.0, 10.0)) {
            Err(err) => {
                assert_eq!(n % 2, 1, "{} channels rejected: {}", n, err);
                assert!(err.to_string().contains("even number of analog outputs"));
                assert!(WorkerError::from(err).is_config_error());
                assert!(sim.events().is_empty());
            }
            Ok(board) => {
                assert_eq!(n % 2, 0);
                let mut worker = TaskController::new(sim.clone(), board);
                worker.init().unwrap();
                assert_eq!(sim.open_tasks(), 1);
                let created = sim.ops().iter().filter(|op| **op == SimOp::CreateAoChan).count();
                assert_eq!(created, n);
            }
        }
    }
}

#[test]
fn defective_daqmx_versions_are_refused() {
    let cases = [
        (DriverVersion::new(14, 0, 0), false),
        (DriverVersion::new(14, 1, 1), false),
        (DriverVersion::new(14, 2, 0), true),
        (DriverVersion::new(13, 5, 0), true),
        (DriverVersion::new(20, 1, 0), true),
    ];
    for (version, accepted) in cases {
        let sim = SimDriver::new(version);
        let mut worker = digital_worker(&sim);
        let result = worker.init();
        if accepted {
            result.unwrap();
            assert_eq!(worker.state(), ControllerState::StaticRunning);
        } else {
            let err = result.unwrap_err();
            assert!(err.is_config_error());
            assert!(matches!(err, WorkerError::Config(ConfigError::DefectiveDriver(v)) if v == version));
            assert!(err
                .to_string()
                .contains(&format!("You are currently using v{}.{}.{}", version.major, version.minor, version.update)));
            assert!(sim.events().is_empty());
            assert_eq!(worker.state(), ControllerState::Uninitialized);

            // Analog boards do not care.
            analog_worker(&sim, 2).init().unwrap();
        }
    }
}

#[test]
fn shot_without_table_leaves_worker_idle() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    sim.clear_events();

    let final_values = worker
        .transition_to_buffered("ao_board", &analog_shot(None), &analog_values(0.0, 0.0), true)
        .unwrap();
    assert!(final_values.is_empty());
    assert_eq!(worker.state(), ControllerState::Idle);
    assert_eq!(sim.ops(), vec![SimOp::Stop, SimOp::Clear]);
    assert_eq!(sim.open_tasks(), 0);
    assert_eq!(sim.owner("PXI1Slot3/ao0"), None);

    sim.clear_events();
    assert!(worker.transition_to_manual(false).unwrap());
    assert_eq!(
        sim.ops(),
        vec![SimOp::CreateTask, SimOp::CreateAoChan, SimOp::CreateAoChan, SimOp::Start]
    );
    assert_eq!(worker.state(), ControllerState::StaticRunning);
}

#[test]
fn analog_shot_generates_all_but_the_last_row() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    sim.clear_events();

    let table = array![[0.0, 0.0], [1.0, -1.0], [2.0, -2.0], [3.0, -3.0], [3.0, -3.0]];
    let final_values = worker
        .transition_to_buffered("ao_board", &analog_shot(Some(table)), &analog_values(0.0, 0.0), false)
        .unwrap();
    assert_eq!(final_values, analog_values(3.0, -3.0));
    assert_eq!(worker.state(), ControllerState::BufferedRunning);
    assert_eq!(
        sim.ops(),
        vec![
            SimOp::Stop,
            SimOp::Clear,
            SimOp::CreateTask,
            SimOp::CreateAoChan,
            SimOp::CfgSampClk,
            SimOp::WriteAnalog,
            SimOp::Start
        ]
    );
    let calls = sim.calls();
    assert!(calls.contains(&SimCall::CfgSampClk {
        source: AO_CLOCK.to_string(),
        rate: 1e6,
        samps_per_chan: 4,
    }));
    assert!(calls.contains(&SimCall::WriteAnalog {
        samps_per_chan: 4,
        auto_start: false,
        layout: DataLayout::GroupByScanNumber,
        data: vec![0.0, 0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0],
    }));
    assert_eq!(sim.output("PXI1Slot3/ao0"), None);

    sim.finish_buffered();
    sim.clear_events();
    assert!(worker.transition_to_manual(false).unwrap());
    assert_eq!(
        sim.ops(),
        vec![
            SimOp::Stop,
            SimOp::Clear,
            SimOp::CreateTask,
            SimOp::CreateAoChan,
            SimOp::CreateAoChan,
            SimOp::Start
        ]
    );
    assert_eq!(sim.output("PXI1Slot3/ao0"), Some(3.0));
    assert_eq!(sim.output("PXI1Slot3/ao1"), Some(-3.0));
}

#[test]
fn digital_shot_unpacks_every_line() {
    let sim = sim();
    let mut worker = digital_worker(&sim);
    worker.init().unwrap();
    sim.clear_events();

    let lines = array![[1, 0, 0], [0, 1, 0], [1, 1, 1]];
    let final_values = worker
        .transition_to_buffered("do_board", &digital_shot(lines), &digital_values(&[]), false)
        .unwrap();
    assert_eq!(final_values, digital_values(&["port0/line0", "port0/line1", "port3/line7"]));

    let calls = sim.calls();
    assert!(calls.contains(&SimCall::CreateDoChan {
        lines: "PXI1Slot6/port0/line0:7, PXI1Slot6/port1/line0:7, PXI1Slot6/port2/line0:7, PXI1Slot6/port3/line0:7"
            .to_string(),
    }));
    assert!(calls.contains(&SimCall::CfgSampClk {
        source: DO_CLOCK.to_string(),
        rate: 5e6,
        samps_per_chan: 3,
    }));
    let written = calls
        .iter()
        .find_map(|call| match call {
            SimCall::WriteDigital { samps_per_chan, data, .. } => Some((*samps_per_chan, data.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(written.0, 3);
    let unpacked = Array2::from_shape_vec((3, 32), written.1).unwrap();
    assert_eq!(unpacked.row(0)[0], 1);
    assert_eq!(unpacked.row(0)[1], 0);
    assert_eq!(unpacked.row(1)[1], 1);
    assert_eq!(unpacked.row(2)[31], 1);
    assert_eq!(unpacked.sum(), 5);

    sim.finish_buffered();
    worker.transition_to_manual(false).unwrap();
    assert_eq!(sim.output("PXI1Slot6/port3/line7"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port2/line0"), Some(0.0));
}

#[test]
fn manual_values_reach_the_outputs() {
    let sim = sim();
    let mut analog = analog_worker(&sim, 2);
    let mut digital = digital_worker(&sim);
    analog.init().unwrap();
    digital.init().unwrap();

    assert!(analog.program_manual(&analog_values(1.5, -2.0)).unwrap().is_empty());
    assert_eq!(sim.output("PXI1Slot3/ao0"), Some(1.5));
    assert_eq!(sim.output("PXI1Slot3/ao1"), Some(-2.0));
    assert_eq!(
        sim.calls().last(),
        Some(&SimCall::WriteAnalog {
            samps_per_chan: 1,
            auto_start: true,
            layout: DataLayout::GroupByChannel,
            data: vec![1.5, -2.0],
        })
    );

    let mut values = digital_values(&["port2/line3"]);
    values.insert("port1/line6".to_string(), 0.5);
    digital.program_manual(&values).unwrap();
    assert_eq!(sim.output("PXI1Slot6/port2/line3"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port1/line6"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port0/line0"), Some(0.0));
}

#[test]
fn abort_clears_without_stopping_and_restores_initial_values() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    worker.program_manual(&analog_values(0.25, 0.5)).unwrap();

    let table = array![[5.0, 5.0], [6.0, 6.0], [6.0, 6.0]];
    worker
        .transition_to_buffered("ao_board", &analog_shot(Some(table)), &analog_values(0.25, 0.5), false)
        .unwrap();
    sim.clear_events();

    assert!(worker.abort_buffered().unwrap());
    assert_eq!(
        sim.ops(),
        vec![
            SimOp::Clear,
            SimOp::CreateTask,
            SimOp::CreateAoChan,
            SimOp::CreateAoChan,
            SimOp::Start,
            SimOp::WriteAnalog
        ]
    );
    assert_eq!(worker.state(), ControllerState::StaticRunning);
    assert_eq!(sim.output("PXI1Slot3/ao0"), Some(0.25));
    assert_eq!(sim.output("PXI1Slot3/ao1"), Some(0.5));
    assert_eq!(sim.open_tasks(), 1);
}

#[test]
fn digital_abort_clears_without_stopping_and_restores_initial_values() {
    let sim = sim();
    let mut worker = digital_worker(&sim);
    worker.init().unwrap();
    let initial = digital_values(&["port0/line1", "port2/line5"]);
    worker.program_manual(&initial).unwrap();

    let lines = array![[1, 0, 1], [0, 0, 1], [1, 0, 1]];
    worker
        .transition_to_buffered("do_board", &digital_shot(lines), &initial, false)
        .unwrap();
    assert_eq!(worker.state(), ControllerState::BufferedRunning);
    sim.clear_events();

    assert!(worker.abort_buffered().unwrap());
    let ops = sim.ops();
    assert!(!ops.contains(&SimOp::Stop));
    assert_eq!(
        ops,
        vec![
            SimOp::Clear,
            SimOp::CreateTask,
            SimOp::CreateDoChan,
            SimOp::CreateDoChan,
            SimOp::CreateDoChan,
            SimOp::CreateDoChan,
            SimOp::Start,
            SimOp::WriteDigital
        ]
    );
    assert_eq!(worker.state(), ControllerState::StaticRunning);
    assert_eq!(sim.output("PXI1Slot6/port0/line1"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port2/line5"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port0/line0"), Some(0.0));
    assert_eq!(sim.output("PXI1Slot6/port3/line7"), Some(0.0));
    assert_eq!(sim.open_tasks(), 1);
}

#[test]
fn boards_without_outputs_fail_before_any_task() {
    let sim = sim();
    for (ports, lines) in [(0, 8), (4, 0)] {
        let err = DigitalBoard::new("do_board", DO, ports, lines).unwrap_err();
        assert!(matches!(err, ConfigError::NoOutputs { .. }));
        assert!(WorkerError::from(err).is_config_error());
    }
    let mut config = ChassisConfig::demo();
    config.boards[1].num_outputs = Some(0);
    assert!(matches!(
        Chassis::from_config(&config, |name| sim.for_board(name)),
        Err(ConfigError::NoOutputs { .. })
    ));
    assert!(sim.events().is_empty());
}

#[test]
fn stopping_an_unfinished_shot_fails_but_releases_the_task() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    let table = array![[5.0, 5.0], [6.0, 6.0], [6.0, 6.0]];
    worker
        .transition_to_buffered("ao_board", &analog_shot(Some(table)), &analog_values(-1.0, 1.0), false)
        .unwrap();

    let err = worker.transition_to_manual(false).unwrap_err();
    assert_eq!(err.daqmx_code(), Some(ERR_STOPPED_BEFORE_DONE));
    assert_eq!(sim.open_tasks(), 0);
    assert_eq!(worker.state(), ControllerState::Idle);

    sim.clear_events();
    worker.abort_buffered().unwrap();
    assert!(!sim.ops().contains(&SimOp::Stop));
    assert!(!sim.ops().contains(&SimOp::Clear));
    assert_eq!(sim.output("PXI1Slot3/ao0"), Some(-1.0));
    assert_eq!(worker.state(), ControllerState::StaticRunning);
}

#[test]
fn abort_after_failed_clock_configuration() {
    let sim = sim();
    let ao = sim.for_board("ao_board");
    let mut worker = analog_worker(&ao, 2);
    worker.init().unwrap();

    ao.fail_next(SimOp::CfgSampClk, -200077);
    let table = array![[5.0, 5.0], [6.0, 6.0], [6.0, 6.0]];
    let err = worker
        .transition_to_buffered("ao_board", &analog_shot(Some(table)), &analog_values(2.0, 3.0), false)
        .unwrap_err();
    assert_eq!(err.daqmx_code(), Some(-200077));
    assert!(!err.is_config_error());
    // The half-built task still holds the channels.
    assert_eq!(ao.open_tasks(), 1);
    assert!(ao.owner("PXI1Slot3/ao0").is_some());

    ao.clear_events();
    worker.abort_transition_to_buffered().unwrap();
    assert_eq!(ao.ops()[0], SimOp::Clear);
    assert!(!ao.ops().contains(&SimOp::Stop));
    assert_eq!(ao.open_tasks(), 1);
    assert_eq!(sim.output("PXI1Slot3/ao0"), Some(2.0));
    assert_eq!(sim.output("PXI1Slot3/ao1"), Some(3.0));
}

#[test]
fn invalid_shots_keep_manual_mode() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    sim.clear_events();

    let short = analog_shot(Some(array![[1.0, 1.0]]));
    let err = worker
        .transition_to_buffered("ao_board", &short, &analog_values(0.0, 0.0), false)
        .unwrap_err();
    assert!(matches!(err, WorkerError::TooFewSamples { rows: 1, required: 2, .. }));

    let digital = digital_shot(array![[1, 1, 1], [0, 0, 0]]);
    let err = worker
        .transition_to_buffered("do_board", &digital, &analog_values(0.0, 0.0), false)
        .unwrap_err();
    assert!(matches!(err, WorkerError::TableKind { board: TaskType::AO, table: TaskType::DO, .. }));

    assert!(sim.ops().is_empty());
    assert_eq!(worker.state(), ControllerState::StaticRunning);
    worker.program_manual(&analog_values(1.0, 1.0)).unwrap();
}

#[test]
fn shutdown_releases_the_board() {
    let sim = sim();
    let mut worker = digital_worker(&sim);
    worker.init().unwrap();
    sim.clear_events();

    worker.shutdown().unwrap();
    assert_eq!(sim.ops(), vec![SimOp::Stop, SimOp::Clear]);
    assert_eq!(sim.open_tasks(), 0);
    assert_eq!(worker.state(), ControllerState::Shutdown);
    assert!(matches!(
        worker.program_manual(&digital_values(&[])),
        Err(WorkerError::InvalidState { state: ControllerState::Shutdown, .. })
    ));
}

#[test]
fn shutdown_mid_shot_still_clears() {
    let sim = sim();
    let mut worker = analog_worker(&sim, 2);
    worker.init().unwrap();
    let table = array![[5.0, 5.0], [6.0, 6.0], [6.0, 6.0]];
    worker
        .transition_to_buffered("ao_board", &analog_shot(Some(table)), &analog_values(0.0, 0.0), false)
        .unwrap();

    let err = worker.shutdown().unwrap_err();
    assert_eq!(err.daqmx_code(), Some(ERR_STOPPED_BEFORE_DONE));
    assert_eq!(sim.open_tasks(), 0);
    assert_eq!(worker.state(), ControllerState::Shutdown);
}

fn chassis_shot() -> Shot {
    let mut exp = Experiment::new();
    exp.add_do_device("do_board", DO, DO_CLOCK).unwrap();
    exp.add_ao_device("ao_board", AO, AO_CLOCK).unwrap();
    exp.add_do_channel("do_board", 0, 0).unwrap();
    for id in 0..8 {
        exp.add_ao_channel("ao_board", id).unwrap();
    }
    exp.set_digital_table("do_board", array![[1], [0], [1], [0]]).unwrap();
    exp.set_analog_table("ao_board", Array2::from_elem((3, 8), 1.0)).unwrap();
    exp.compile().unwrap()
}

fn chassis_initial_values() -> HashMap<String, FrontPanelValues> {
    let analog: FrontPanelValues = Model::Pxi6733.channel_names().into_iter().map(|name| (name, 0.5)).collect();
    convert_args!(
        keys = String::from,
        hashmap!("do_board" => digital_values(&["port0/line1"]), "ao_board" => analog)
    )
}

fn routed_sim() -> SimDriver {
    let sim = sim();
    sim.route_terminal(AO_CLOCK, "PXI1Slot6/port0/line0");
    sim
}

#[test]
fn chassis_moves_digital_boards_first() {
    let sim = routed_sim();
    let mut chassis = Chassis::from_config(&ChassisConfig::demo(), |name| sim.for_board(name)).unwrap();
    assert_eq!(chassis.buffered_order(), vec!["do_board", "ao_board"]);
    assert_eq!(chassis.manual_order(), vec!["ao_board", "do_board"]);
    chassis.init().unwrap();
    sim.clear_events();

    let final_values = chassis.transition_to_buffered(&chassis_shot(), &chassis_initial_values()).unwrap();
    assert_eq!(final_values["do_board"]["port0/line0"], 0.0);
    assert_eq!(final_values["ao_board"]["ao7"], 1.0);

    let clocks: Vec<String> = sim
        .events()
        .into_iter()
        .filter(|e| e.call.op() == SimOp::CfgSampClk)
        .map(|e| e.label)
        .collect();
    assert_eq!(clocks, vec!["do_board", "ao_board"]);

    sim.finish_buffered();
    assert!(chassis.transition_to_manual(false).unwrap());
    for name in ["do_board", "ao_board"] {
        assert_eq!(chassis.worker(name).unwrap().state(), ControllerState::StaticRunning);
    }
    assert_eq!(sim.output("PXI1Slot3/ao3"), Some(1.0));

    chassis.shutdown().unwrap();
    assert_eq!(sim.for_board("do_board").open_tasks(), 0);
    assert_eq!(sim.for_board("ao_board").open_tasks(), 0);
}

#[test]
fn analog_first_collides_on_the_clock_terminal() {
    let sim = routed_sim();
    let mut digital = digital_worker(&sim);
    let mut analog = analog_worker(&sim, 8);
    digital.init().unwrap();
    analog.init().unwrap();
    let shot = chassis_shot();
    let initial = chassis_initial_values();

    let err = analog
        .transition_to_buffered("ao_board", &shot, &initial["ao_board"], false)
        .unwrap_err();
    assert_eq!(err.daqmx_code(), Some(ERR_RESOURCE_RESERVED));
    analog.abort_transition_to_buffered().unwrap();

    digital
        .transition_to_buffered("do_board", &shot, &initial["do_board"], false)
        .unwrap();
    analog
        .transition_to_buffered("ao_board", &shot, &initial["ao_board"], false)
        .unwrap();
    assert_eq!(analog.state(), ControllerState::BufferedRunning);
}

#[test]
fn chassis_failure_aborts_every_started_worker() {
    let sim = routed_sim();
    let mut chassis = Chassis::from_config(&ChassisConfig::demo(), |name| sim.for_board(name)).unwrap();
    chassis.init().unwrap();
    let initial = chassis_initial_values();
    for (name, values) in &initial {
        chassis.worker_mut(name).unwrap().program_manual(values).unwrap();
    }

    sim.for_board("ao_board").fail_next(SimOp::Start, -200000);
    let err = chassis.transition_to_buffered(&chassis_shot(), &initial).unwrap_err();
    assert_eq!(err.daqmx_code(), Some(-200000));

    for name in ["do_board", "ao_board"] {
        assert_eq!(chassis.worker(name).unwrap().state(), ControllerState::StaticRunning);
        assert_eq!(sim.for_board(name).open_tasks(), 1);
    }
    assert_eq!(sim.output("PXI1Slot3/ao5"), Some(0.5));
    assert_eq!(sim.output("PXI1Slot6/port0/line1"), Some(1.0));
    assert_eq!(sim.output("PXI1Slot6/port0/line0"), Some(0.0));
}

#[test]
fn chassis_from_config_rejects_odd_analog_boards() {
    let mut config = ChassisConfig::demo();
    config.boards[1].num_outputs = Some(5);
    let sim = sim();
    let result = Chassis::from_config(&config, |name| sim.for_board(name));
    assert!(matches!(result, Err(ConfigError::OddAnalogCount { count: 5, .. })));
    assert!(sim.events().is_empty());
}
